//! Reading order of the images within an episode
//!
//! Order is ascending `sequence`, ties broken by ascending image id. Sequences
//! are free-form integers: nothing here renumbers, densifies or dedups them.

use crate::db::{DbImage, ImageId, SequenceEdit};
use std::collections::HashMap;

/// First sequence for a new upload batch: one past the current maximum, or 1
///
/// `None` when the current maximum is already `i64::MAX`.
pub fn next_sequence(existing: &[DbImage]) -> Option<i64> {
    existing
        .iter()
        .map(|image| image.sequence)
        .max()
        .unwrap_or(0)
        .checked_add(1)
}

/// Pair each new file with its sequence, preserving the caller's file order
///
/// `None` when the batch would run past `i64::MAX`.
pub fn assign_sequences<T>(existing: &[DbImage], files: Vec<T>) -> Option<Vec<(T, i64)>> {
    let start = next_sequence(existing)?;
    let last_offset = i64::try_from(files.len().saturating_sub(1)).ok()?;
    start.checked_add(last_offset)?;
    Some(
        files
            .into_iter()
            .zip(0_i64..)
            .map(|(file, offset)| (file, start + offset))
            .collect(),
    )
}

/// Sort images into reading order in place
pub fn sort_reading_order(images: &mut [DbImage]) {
    images.sort_by_key(|image| (image.sequence, image.id));
}

/// Ids referenced by `edits` that are not among `images`
pub fn unknown_edit_targets(images: &[DbImage], edits: &[SequenceEdit]) -> Vec<ImageId> {
    edits
        .iter()
        .map(|edit| edit.image_id)
        .filter(|id| !images.iter().any(|image| image.id == *id))
        .collect()
}

/// Apply sequence edits and return the images in their new reading order
///
/// Images without an edit keep their sequence. When an id is edited more than
/// once the last edit wins. Edits for unknown ids are ignored, callers check
/// them with [`unknown_edit_targets`] first.
pub fn apply_reorder(images: &[DbImage], edits: &[SequenceEdit]) -> Vec<DbImage> {
    let new_sequences: HashMap<ImageId, i64> = edits
        .iter()
        .map(|edit| (edit.image_id, edit.sequence))
        .collect();

    let mut reordered: Vec<DbImage> = images
        .iter()
        .cloned()
        .map(|mut image| {
            if let Some(sequence) = new_sequences.get(&image.id) {
                image.sequence = *sequence;
            }
            image
        })
        .collect();

    sort_reading_order(&mut reordered);
    reordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn image(id: ImageId, sequence: i64) -> DbImage {
        DbImage {
            id,
            episode_id: 1,
            image_url: format!("http://x/{}.png", id),
            storage_key: format!("episodes/1/{}.png", id),
            sequence,
            created_at: Utc::now(),
        }
    }

    fn ids(images: &[DbImage]) -> Vec<ImageId> {
        images.iter().map(|i| i.id).collect()
    }

    #[test]
    fn test_next_sequence_empty_starts_at_one() {
        assert_eq!(next_sequence(&[]), Some(1));
    }

    #[test]
    fn test_next_sequence_uses_max_not_count() {
        let existing = vec![image(1, 3), image(2, 10), image(3, 7)];
        assert_eq!(next_sequence(&existing), Some(11));
    }

    #[test]
    fn test_assign_sequences_after_max_in_upload_order() {
        let existing = vec![image(1, 4), image(2, 2)];
        let assigned = assign_sequences(&existing, vec!["c.png", "a.png", "b.png"]).unwrap();
        assert_eq!(assigned, vec![("c.png", 5), ("a.png", 6), ("b.png", 7)]);
    }

    #[test]
    fn test_assign_sequences_to_empty_episode() {
        let assigned = assign_sequences(&[], vec!["f1", "f2", "f3"]).unwrap();
        let sequences: Vec<_> = assigned.iter().map(|(_, s)| *s).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
    }

    #[test]
    fn test_assign_sequences_with_negative_existing() {
        let existing = vec![image(1, -5)];
        let assigned = assign_sequences(&existing, vec!["x"]).unwrap();
        assert_eq!(assigned, vec![("x", -4)]);
    }

    #[test]
    fn test_next_sequence_at_max_is_exhausted() {
        assert_eq!(next_sequence(&[image(1, i64::MAX)]), None);
        assert!(assign_sequences(&[image(1, i64::MAX)], vec!["x"]).is_none());
    }

    #[test]
    fn test_assign_sequences_up_to_max() {
        let existing = vec![image(1, i64::MAX - 3)];
        let assigned = assign_sequences(&existing, vec!["a", "b", "c"]).unwrap();
        assert_eq!(assigned.last(), Some(&("c", i64::MAX)));
        assert!(assign_sequences(&existing, vec!["a", "b", "c", "d"]).is_none());
    }

    #[test]
    fn test_reorder_single_image_matches_stable_sort() {
        let images = vec![image(1, 1), image(2, 2), image(3, 3), image(4, 4)];
        let reordered = apply_reorder(
            &images,
            &[SequenceEdit {
                image_id: 4,
                sequence: 2,
            }],
        );
        // Image 4 now ties with image 2 and sorts after it by id
        assert_eq!(ids(&reordered), vec![1, 2, 4, 3]);
    }

    #[test]
    fn test_reorder_arbitrary_values_equal_sort_by_sequence_then_id() {
        let images: Vec<DbImage> = (1..=12).map(|id| image(id, id)).collect();

        // Deterministic spread of values including duplicates and negatives
        let edits: Vec<SequenceEdit> = (1..=12)
            .map(|id| SequenceEdit {
                image_id: id,
                sequence: (id * 7 % 5) - 2,
            })
            .collect();

        let reordered = apply_reorder(&images, &edits);

        let mut expected: Vec<(i64, ImageId)> = edits
            .iter()
            .map(|e| (e.sequence, e.image_id))
            .collect();
        expected.sort();
        let expected_ids: Vec<ImageId> = expected.into_iter().map(|(_, id)| id).collect();

        assert_eq!(ids(&reordered), expected_ids);
    }

    #[test]
    fn test_reorder_last_edit_wins() {
        let images = vec![image(1, 1), image(2, 2)];
        let reordered = apply_reorder(
            &images,
            &[
                SequenceEdit {
                    image_id: 1,
                    sequence: 9,
                },
                SequenceEdit {
                    image_id: 1,
                    sequence: 0,
                },
            ],
        );
        assert_eq!(ids(&reordered), vec![1, 2]);
        assert_eq!(reordered[0].sequence, 0);
    }

    #[test]
    fn test_unknown_edit_targets() {
        let images = vec![image(1, 1), image(2, 2)];
        let edits = [
            SequenceEdit {
                image_id: 2,
                sequence: 1,
            },
            SequenceEdit {
                image_id: 5,
                sequence: 1,
            },
        ];
        assert_eq!(unknown_edit_targets(&images, &edits), vec![5]);
    }

    #[test]
    fn test_removing_an_image_keeps_relative_order() {
        let mut images = vec![image(1, 5), image(2, 1), image(3, 5), image(4, 3)];
        sort_reading_order(&mut images);
        let before = ids(&images);

        let remaining: Vec<DbImage> = images.iter().filter(|i| i.id != 4).cloned().collect();
        let mut after = remaining.clone();
        sort_reading_order(&mut after);

        let expected: Vec<ImageId> = before.into_iter().filter(|id| *id != 4).collect();
        assert_eq!(ids(&after), expected);
        assert_eq!(ids(&remaining), expected);
    }
}
