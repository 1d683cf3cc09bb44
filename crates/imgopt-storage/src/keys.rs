//! Storage key layout.
//!
//! ```text
//! batches/{batch_id}/input.xlsx
//! batches/{batch_id}/output.xlsx
//! images/{batch_id}/{nice_id}.jpg
//! ```

use imgopt_core::BatchId;

pub fn batch_prefix(batch_id: BatchId) -> String {
    format!("batches/{}", batch_id)
}

pub fn batch_input_key(batch_id: BatchId) -> String {
    format!("{}/input.xlsx", batch_prefix(batch_id))
}

pub fn batch_output_key(batch_id: BatchId) -> String {
    format!("{}/output.xlsx", batch_prefix(batch_id))
}

pub fn image_prefix(batch_id: BatchId) -> String {
    format!("images/{}", batch_id)
}

/// Key of a converted image. `nice_id` must already be URL-safe.
pub fn image_key(batch_id: BatchId, nice_id: &str) -> String {
    format!("{}/{}.jpg", image_prefix(batch_id), nice_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn keys_are_scoped_by_batch() {
        let id = Uuid::new_v4();
        assert_eq!(batch_input_key(id), format!("batches/{}/input.xlsx", id));
        assert_eq!(batch_output_key(id), format!("batches/{}/output.xlsx", id));
        assert_eq!(image_key(id, "cat-0123456789"), format!("images/{}/cat-0123456789.jpg", id));
        assert!(batch_input_key(id).starts_with(&batch_prefix(id)));
        assert!(image_key(id, "x").starts_with(&image_prefix(id)));
    }
}
