mod app;

pub use app::create_app;
