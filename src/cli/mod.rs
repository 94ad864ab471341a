pub mod gains;
pub mod players;
pub mod setup;
pub mod track;
pub mod ui;
