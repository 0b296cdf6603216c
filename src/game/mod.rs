pub mod constants;
pub mod objects;
pub mod registry;
pub mod spawn;
pub mod validation;
