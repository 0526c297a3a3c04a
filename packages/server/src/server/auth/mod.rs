// Bearer token verification (tokens are issued by the identity platform)
pub mod jwt;

pub use jwt::{Claims, JwtService};
