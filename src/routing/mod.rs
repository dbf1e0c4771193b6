mod matcher;

pub use matcher::{RoutePattern, RouteTable};
