//! File materializer: binary files in, entity changes out, and back.

pub mod materialize;
pub mod plugin;

pub use materialize::{
    FILE_DESCRIPTOR_SCHEMA, FileWrite, delete_file, file_descriptor, list_files, materialize_file,
    materialize_file_at, write_file,
};
pub use plugin::{
    DetectedChange, EntityConflict, FileDescriptor, MergeFileInput, MergeFileOutput, Plugin,
    PluginError, PluginRegistry, PluginResult,
};
