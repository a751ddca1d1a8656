pub mod dex;
pub mod util;
