pub mod config;
pub(crate) mod config_file;
pub mod logger;
pub mod paths;

pub use config::*;
pub use logger::setup_logging;
pub use paths::{
    ancestor_folders, folder_of, is_media_file, is_os_hidden_file, mtime_changed, path_relative_to,
    path_to_db_string,
};
