pub mod actions;
pub mod analyser;
pub mod app;
pub mod audio;
pub mod cache;
pub mod config;
pub mod media_session;
pub mod metadata;
pub mod theme;
pub mod ui;
pub mod visualizer;
