mod loader;
mod resource_cache;
mod resource_guard;

pub use loader::*;
pub use resource_cache::*;
pub use resource_guard::*;
