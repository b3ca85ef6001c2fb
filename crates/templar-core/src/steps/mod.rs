//! Concrete build steps, in pipeline order.

mod clone_source;
mod create;
mod finalize;
mod iso;
mod post;
mod provision;
mod start;

pub use clone_source::DiscoverCloneSource;
pub use create::CreateVm;
pub use finalize::Finalize;
pub use iso::ResolveIsos;
pub use post::{ConvertToTemplate, UnmountMedia};
pub use provision::Provision;
pub use start::StartVm;
