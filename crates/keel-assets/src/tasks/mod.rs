//! Tasks that stage assets into the configured mirrors

mod copy_file;
mod copy_image;

pub use copy_file::{CopyFile, COPY_FILE_KIND};
pub use copy_image::{CopyImage, ImageCopier, COPY_IMAGE_KIND};

#[cfg(test)]
pub use copy_image::MockImageCopier;
