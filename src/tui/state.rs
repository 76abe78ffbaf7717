use crate::model::{InfoEvent, JobEvent, JobId, MigrationJob, PathCategory, Selection};
use crate::storage::{self, PathCache};

/// Lines of build output kept on screen; older lines are dropped.
pub const MAX_LOG_LINES: usize = 5000;

/// Inline path entry standing in for a file/folder picker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPrompt {
    pub category: PathCategory,
    pub input: String,
}

pub struct UiState {
    pub focus: PathCategory,
    pub selection: Selection,
    pub highlighted: [usize; 3], // Index into the focused category's cached paths
    pub prompt: Option<PathPrompt>,
    pub show_help: bool,

    pub running: Option<JobId>,
    pub start_pending: bool, // Start sent, waiting for the controller's answer
    pub cancel_requested: bool,

    pub log: Vec<String>,
    pub log_scroll: usize, // Lines scrolled up from the bottom; 0 follows new output
    pub info: String,
    pub last_job: Option<MigrationJob>,
    pub last_command: Option<String>,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            focus: PathCategory::Plugin,
            selection: Selection::default(),
            highlighted: [0; 3],
            prompt: None,
            show_help: false,
            running: None,
            start_pending: false,
            cancel_requested: false,
            log: Vec::new(),
            log_scroll: 0,
            info: String::new(),
            last_job: None,
            last_command: None,
        }
    }
}

impl UiState {
    /// "Begin Migration" is enabled.
    pub fn can_start(&self) -> bool {
        self.running.is_none() && !self.start_pending
    }

    /// "Stop" is enabled.
    pub fn can_stop(&self) -> bool {
        self.running.is_some() && !self.cancel_requested
    }

    pub fn push_log(&mut self, line: String) {
        self.log.push(line);
        if self.log.len() > MAX_LOG_LINES {
            let _ = self.log.drain(0..(self.log.len() - MAX_LOG_LINES));
        }
    }

    fn restore_idle(&mut self) {
        self.running = None;
        self.start_pending = false;
        self.cancel_requested = false;
    }

    pub fn apply_event(&mut self, ev: JobEvent) {
        match ev {
            JobEvent::Started { id, command } => {
                self.running = Some(id);
                self.start_pending = false;
                self.log.clear();
                self.log_scroll = 0;
                self.push_log(format!("> {command}"));
                self.last_command = Some(command);
                self.info = format!("Migration {id} running…");
            }
            JobEvent::Output { line, .. } => self.push_log(line),
            JobEvent::Info(info) => {
                let msg = info.to_message();
                match info {
                    InfoEvent::ValidationFailed(_) | InfoEvent::AlreadyRunning { .. } => {
                        self.start_pending = false;
                        self.push_log(msg.clone());
                    }
                    InfoEvent::TaskFailed(_) => {
                        self.restore_idle();
                        self.push_log(msg.clone());
                    }
                    _ => {}
                }
                self.info = msg;
            }
            JobEvent::Finished { job } => {
                let summary = job.summary();
                self.restore_idle();
                self.push_log(summary.clone());
                self.info = summary;
                self.last_job = Some(*job);
            }
        }
    }

    pub fn focus_next(&mut self) {
        let i = (self.focus.index() + 1) % PathCategory::ALL.len();
        self.focus = PathCategory::ALL[i];
    }

    pub fn focus_prev(&mut self) {
        let n = PathCategory::ALL.len();
        let i = (self.focus.index() + n - 1) % n;
        self.focus = PathCategory::ALL[i];
    }

    pub fn move_highlight(&mut self, cache: &PathCache, delta: isize) {
        let len = cache.entries(self.focus).len();
        let slot = &mut self.highlighted[self.focus.index()];
        if len == 0 {
            *slot = 0;
            return;
        }
        *slot = (*slot as isize + delta).rem_euclid(len as isize) as usize;
    }

    /// Clamp a highlight that points past the end after the list shrank.
    fn clamp_highlight(&mut self, cache: &PathCache, category: PathCategory) {
        let len = cache.entries(category).len();
        let slot = &mut self.highlighted[category.index()];
        *slot = (*slot).min(len.saturating_sub(1));
    }

    /// Apply a picker result: `None` means the user picked nothing.
    pub fn choose_path(&mut self, cache: &mut PathCache, category: PathCategory, picked: Option<&str>) {
        match picked.and_then(storage::normalize_path) {
            Some(path) => {
                cache.add(category, &path);
                self.highlighted[category.index()] = 0;
                self.info = format!("{}: {}", category.label(), path);
                self.selection.set(category, Some(path));
            }
            None => {
                self.selection.set(category, None);
                self.info = format!("No {} was selected", category.label());
            }
        }
    }

    /// Select the highlighted cached path of the focused category.
    pub fn select_highlighted(&mut self, cache: &mut PathCache) {
        let category = self.focus;
        let Some(path) = cache
            .entries(category)
            .get(self.highlighted[category.index()])
            .cloned()
        else {
            self.info = format!("No remembered {} yet; press b to browse", category.label());
            return;
        };
        self.choose_path(cache, category, Some(&path));
    }

    /// Forget the selected path of the focused category, or the highlighted
    /// entry when nothing is selected.
    pub fn delete_selected(&mut self, cache: &mut PathCache) {
        let category = self.focus;
        let target = match self.selection.get(category) {
            Some(p) => Some(p.to_string()),
            None => cache
                .entries(category)
                .get(self.highlighted[category.index()])
                .cloned(),
        };
        let Some(path) = target else {
            self.info = "Nothing to delete".into();
            return;
        };
        if cache.remove(category, &path) {
            self.info = format!("Removed from cache: {path}");
        } else {
            self.info = format!("Not in cache: {path}");
        }
        if self.selection.get(category) == Some(path.as_str()) {
            self.selection.set(category, None);
        }
        self.clamp_highlight(cache, category);
    }

    /// Open the inline prompt, prefilled with the current or most recent path.
    pub fn open_prompt(&mut self, cache: &PathCache) {
        let category = self.focus;
        let input = self
            .selection
            .get(category)
            .or_else(|| cache.front(category))
            .unwrap_or_default()
            .to_string();
        self.prompt = Some(PathPrompt { category, input });
    }

    pub fn scroll_log(&mut self, delta: isize) {
        let max = self.log.len().saturating_sub(1);
        self.log_scroll = (self.log_scroll as isize + delta).clamp(0, max as isize) as usize;
    }

    /// Slice of the log visible in a window of `height` lines.
    pub fn visible_log(&self, height: usize) -> &[String] {
        let end = self.log.len() - self.log_scroll.min(self.log.len());
        let start = end.saturating_sub(height);
        &self.log[start..end]
    }
}
