pub mod image_helper {
    use crate::core_modules::blob::{Blob, SENTINEL_ID};
    use crate::core_modules::blobtree::Blobtree;
    use crate::core_modules::workspace::Workspace;
    use crate::error::BlobResult;
    use image::ImageEncoder;
    use std::path::Path;

    /// Loads any image the `image` crate understands as 8-bit grayscale.
    pub fn load_luma(path: impl AsRef<Path>) -> BlobResult<(Vec<u8>, u32, u32)> {
        let gray = image::open(path)?.to_luma8();
        let (width, height) = gray.dimensions();
        Ok((gray.into_raw(), width, height))
    }

    /// Colour of a blob, derived from its geometry so it stays put between
    /// frames while the blob does.
    pub fn blob_color(blob: &Blob) -> [u8; 3] {
        let seed = blob.area as u64 + blob.roi.x as u64 + blob.roi.y as u64;
        [
            ((seed * 25 + 100) % 256) as u8,
            ((seed * 49 + 10) % 256) as u8,
            ((seed * 841 + 1) % 256) as u8,
        ]
    }

    /// RGB rendering of the filtered id map. Unlabeled pixels and pixels whose
    /// nodes were all filtered out are black.
    pub fn colorize_filtered_ids(workspace: &Workspace, tree: &Blobtree) -> Vec<u8> {
        let (width, height) = (workspace.width(), workspace.height());
        let mut buffer = vec![0u8; width as usize * height as usize * 3];
        let palette: Vec<[u8; 3]> = tree
            .nodes()
            .iter()
            .map(|n| if n.id() == SENTINEL_ID { [0; 3] } else { blob_color(&n.blob) })
            .collect();

        for (i, rgb) in buffer.chunks_exact_mut(3).enumerate() {
            let (x, y) = (i as u32 % width, i as u32 / width);
            let node = workspace
                .filtered_id_at(x, y)
                .or_else(|| workspace.node_id_at(x, y))
                .unwrap_or(SENTINEL_ID);
            if let Some(color) = palette.get(node) {
                rgb.copy_from_slice(color);
            }
        }
        buffer
    }

    pub fn save_rgb(path: impl AsRef<Path>, width: u32, height: u32, buffer: &[u8]) -> BlobResult<()> {
        let output = std::fs::File::create(path)?;
        let encoder = image::codecs::png::PngEncoder::new(output);
        encoder.write_image(buffer, width, height, image::ExtendedColorType::Rgb8)?;
        Ok(())
    }
}
