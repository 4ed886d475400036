pub mod geo;
pub mod grid;
pub mod io;
pub mod terrain;
pub mod path;
pub mod models;
pub mod output;
pub mod coverage;
