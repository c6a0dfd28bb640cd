// Character-level text diffs used to store page history compactly.

pub mod patch;

pub use patch::{apply_patch_ops, diff_to_patch_ops, PatchError, TextPatchOp};
