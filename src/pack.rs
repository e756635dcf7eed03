//! Size-bounded batching of downloaded files.

use crate::types::{Batch, MaterializedFile};

/// Splits `files` into batches of at most `capacity` cumulative bytes.
///
/// Greedy and order-preserving: files are taken in arrival order and a new
/// batch is opened only when the next file would push the current one over
/// `capacity`. A file larger than `capacity` is never dropped or split; it
/// ends up alone in its own batch. Batch indices start at 1.
///
/// # Example
///
/// ```
/// use linkbundle::{pack, MaterializedFile};
///
/// let files: Vec<_> = [300, 300, 100]
///     .iter()
///     .enumerate()
///     .map(|(i, &size)| MaterializedFile { path: format!("f{i}").into(), size })
///     .collect();
///
/// let batches = pack(files, 500);
/// assert_eq!(batches.len(), 2);
/// assert_eq!(batches[1].files.len(), 2);
/// ```
pub fn pack(files: Vec<MaterializedFile>, capacity: u64) -> Vec<Batch> {
    let mut batches = Vec::new();
    let mut current = Vec::new();
    let mut running_size = 0u64;

    for file in files {
        if running_size.saturating_add(file.size) > capacity && !current.is_empty() {
            batches.push(Batch {
                index: batches.len() + 1,
                files: std::mem::take(&mut current),
            });
            running_size = 0;
        }
        running_size = running_size.saturating_add(file.size);
        current.push(file);
    }

    if !current.is_empty() {
        batches.push(Batch {
            index: batches.len() + 1,
            files: current,
        });
    }

    batches
}
