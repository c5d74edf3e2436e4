pub mod distributor;
pub mod lifecycle;
pub mod resolver;
