mod image_store;

pub use image_store::{spawn_save, DiskImageStore, ImageKind, ImageStore};
