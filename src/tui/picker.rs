//! Native OS file/folder dialogs.

use crate::model::{PathCategory, PickKind};
use std::path::Path;

/// Show a modal dialog for `category`. Returns `None` when the user cancels.
pub fn pick(category: PathCategory, current: Option<&str>) -> Option<String> {
    let mut dialog = rfd::FileDialog::new().set_title(format!("Select {}", category.label()));
    if let Some(start) = current.map(Path::new) {
        let dir = if start.is_dir() { Some(start) } else { start.parent() };
        if let Some(dir) = dir.filter(|d| d.is_dir()) {
            dialog = dialog.set_directory(dir);
        }
    }
    let picked = match category.pick_kind() {
        PickKind::File { extension } => dialog
            .add_filter("Unreal plugin descriptor", &[extension])
            .pick_file(),
        PickKind::Folder => dialog.pick_folder(),
    };
    tracing::debug!(category = ?category, picked = ?picked, "native dialog closed");
    picked.map(|p| p.to_string_lossy().into_owned())
}
