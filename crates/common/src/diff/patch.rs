use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Above this many differing characters (after trimming the common prefix and
/// suffix) the middle is stored as one delete plus one insert instead of
/// running the quadratic-memory edit search.
const MAX_MYERS_CHARS: usize = 1_024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TextPatchOp {
    Insert { index: u32, text: String },
    Delete { index: u32, len: u32 },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatchError {
    #[error("patch operation at byte {index} is outside text of {len} bytes")]
    OutOfRange { index: usize, len: usize },

    #[error("patch operation at byte {0} splits a UTF-8 character")]
    NotCharBoundary(usize),

    #[error("patch operation produced a negative index")]
    NegativeIndex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CharEdit {
    Equal(char),
    Insert(char),
    Delete(char),
}

/// Computes a patch-style diff from `old_text` to `new_text`.
///
/// Operations use UTF-8 byte offsets into `old_text` and are applied in order
/// by [`apply_patch_ops`].
pub fn diff_to_patch_ops(old_text: &str, new_text: &str) -> Vec<TextPatchOp> {
    if old_text == new_text {
        return Vec::new();
    }

    let old_chars: Vec<char> = old_text.chars().collect();
    let new_chars: Vec<char> = new_text.chars().collect();

    let prefix = old_chars.iter().zip(&new_chars).take_while(|(a, b)| a == b).count();
    let suffix = old_chars[prefix..]
        .iter()
        .rev()
        .zip(new_chars[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();

    let old_mid = &old_chars[prefix..old_chars.len() - suffix];
    let new_mid = &new_chars[prefix..new_chars.len() - suffix];

    let mut edits: Vec<CharEdit> = old_chars[..prefix].iter().copied().map(CharEdit::Equal).collect();
    if old_mid.len() + new_mid.len() > MAX_MYERS_CHARS {
        edits.extend(old_mid.iter().copied().map(CharEdit::Delete));
        edits.extend(new_mid.iter().copied().map(CharEdit::Insert));
    } else {
        edits.extend(myers_char_edits(old_mid, new_mid));
    }
    edits.extend(old_chars[old_chars.len() - suffix..].iter().copied().map(CharEdit::Equal));

    edits_to_patch_ops(&edits)
}

/// Applies patch operations produced by [`diff_to_patch_ops`] to `base`.
pub fn apply_patch_ops(base: &str, patch_ops: &[TextPatchOp]) -> Result<String, PatchError> {
    let mut text = base.to_owned();
    let mut offset: i64 = 0;

    for patch_op in patch_ops {
        match patch_op {
            TextPatchOp::Delete { index, len } => {
                let start = shifted_index(*index, offset)?;
                let end = start + *len as usize;
                check_boundary(&text, start)?;
                check_boundary(&text, end)?;
                text.replace_range(start..end, "");
                offset -= i64::from(*len);
            }
            TextPatchOp::Insert { index, text: inserted } => {
                let target = shifted_index(*index, offset)?;
                check_boundary(&text, target)?;
                text.insert_str(target, inserted);
                offset += inserted.len() as i64;
            }
        }
    }

    Ok(text)
}

fn shifted_index(index: u32, offset: i64) -> Result<usize, PatchError> {
    usize::try_from(i64::from(index) + offset).map_err(|_| PatchError::NegativeIndex)
}

fn check_boundary(text: &str, index: usize) -> Result<(), PatchError> {
    if index > text.len() {
        return Err(PatchError::OutOfRange { index, len: text.len() });
    }
    if !text.is_char_boundary(index) {
        return Err(PatchError::NotCharBoundary(index));
    }
    Ok(())
}

impl CharEdit {
    fn ch(self) -> char {
        match self {
            CharEdit::Equal(ch) | CharEdit::Insert(ch) | CharEdit::Delete(ch) => ch,
        }
    }
}

/// Shortest edit script between two char slices (Myers). `frontiers[d]`
/// holds the furthest x reached on each diagonal after `d` edits.
fn myers_char_edits(old: &[char], new: &[char]) -> Vec<CharEdit> {
    if old.is_empty() {
        return new.iter().copied().map(CharEdit::Insert).collect();
    }
    if new.is_empty() {
        return old.iter().copied().map(CharEdit::Delete).collect();
    }

    let (n, m) = (old.len() as isize, new.len() as isize);
    let slot = |k: isize| (k + n + m) as usize;
    let mut frontier = vec![0isize; 2 * (n + m) as usize + 1];
    let mut frontiers: Vec<Vec<isize>> = Vec::new();

    for d in 0..=(n + m) {
        for k in (-d..=d).step_by(2) {
            let from_above = k == -d || (k != d && frontier[slot(k - 1)] < frontier[slot(k + 1)]);
            let mut x = if from_above { frontier[slot(k + 1)] } else { frontier[slot(k - 1)] + 1 };
            let mut y = x - k;
            while x < n && y < m && old[x as usize] == new[y as usize] {
                x += 1;
                y += 1;
            }
            frontier[slot(k)] = x;

            if x >= n && y >= m {
                frontiers.push(frontier);
                return walk_back(old, new, &frontiers, slot);
            }
        }
        frontiers.push(frontier.clone());
    }

    old.iter()
        .copied()
        .map(CharEdit::Delete)
        .chain(new.iter().copied().map(CharEdit::Insert))
        .collect()
}

fn walk_back(
    old: &[char],
    new: &[char],
    frontiers: &[Vec<isize>],
    slot: impl Fn(isize) -> usize,
) -> Vec<CharEdit> {
    let mut edits = Vec::with_capacity(old.len() + new.len());
    let (mut x, mut y) = (old.len() as isize, new.len() as isize);

    for d in (1..frontiers.len()).rev() {
        let before = &frontiers[d - 1];
        let (d, k) = (d as isize, x - y);
        let from_above = k == -d || (k != d && before[slot(k - 1)] < before[slot(k + 1)]);
        let prev_k = if from_above { k + 1 } else { k - 1 };
        let prev_x = before[slot(prev_k)];
        let snake_x = if from_above { prev_x } else { prev_x + 1 };

        while x > snake_x {
            x -= 1;
            y -= 1;
            edits.push(CharEdit::Equal(old[x as usize]));
        }
        if from_above {
            y -= 1;
            edits.push(CharEdit::Insert(new[y as usize]));
        } else {
            x -= 1;
            edits.push(CharEdit::Delete(old[x as usize]));
        }
    }
    while x > 0 {
        x -= 1;
        edits.push(CharEdit::Equal(old[x as usize]));
    }

    edits.reverse();
    edits
}

/// Fold runs of same-kind edits into ops. Indexes are byte offsets into the
/// old text.
fn edits_to_patch_ops(edits: &[CharEdit]) -> Vec<TextPatchOp> {
    let mut ops = Vec::new();
    let mut at = 0u32;
    let mut rest = edits;

    while let Some(&first) = rest.first() {
        let kind = std::mem::discriminant(&first);
        let run = rest.iter().take_while(|edit| std::mem::discriminant(*edit) == kind).count();
        let (chunk, tail) = rest.split_at(run);
        let text: String = chunk.iter().map(|edit| edit.ch()).collect();
        let bytes = text.len() as u32;

        match first {
            CharEdit::Equal(_) => at += bytes,
            CharEdit::Delete(_) => {
                ops.push(TextPatchOp::Delete { index: at, len: bytes });
                at += bytes;
            }
            CharEdit::Insert(_) => ops.push(TextPatchOp::Insert { index: at, text }),
        }
        rest = tail;
    }

    ops
}
