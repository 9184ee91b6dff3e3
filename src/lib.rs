pub mod app;
pub mod catalog;
pub mod config;
pub mod daemon;
pub mod dataset;
pub mod detect;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod fs_util;
pub mod output;
pub mod project;
pub mod quality;
pub mod result;
pub mod rules;
pub mod store;
