mod app;
mod people;

pub use app::app;
