pub mod hiscores;
pub mod util;

pub use hiscores::HiscoresClient;
