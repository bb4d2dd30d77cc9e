pub mod invitation;
pub mod metadata;
pub mod organization;
pub mod session;
pub mod upload;

pub use invitation::*;
pub use metadata::*;
pub use organization::*;
pub use session::*;
pub use upload::*;
