pub mod cookie;
pub mod path;
pub mod session;
pub mod set_cookie;

pub use cookie::*;
pub use path::*;
pub use session::*;
pub use set_cookie::*;