use std::fs;
use std::path::{Path, PathBuf};

use crossbeam::channel::{self, Receiver};
use log::{debug, info, warn};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};

/// Watches one shader file and hands back its new source when it changes.
pub struct ShaderHotReload {
    path: PathBuf,
    last_content: String,
    events: Receiver<notify::Result<notify::Event>>,
    _watcher: RecommendedWatcher,
}

impl ShaderHotReload {
    pub fn new(path: impl AsRef<Path>) -> notify::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let (tx, events) = channel::unbounded();
        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = tx.send(res);
        })?;
        // editors often replace the file, so watch its directory
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        watcher.watch(&parent, RecursiveMode::NonRecursive)?;
        let last_content = fs::read_to_string(&path).unwrap_or_default();
        info!("ShaderHotReload watching {}", path.display());
        Ok(Self {
            path,
            last_content,
            events,
            _watcher: watcher,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn source(&self) -> &str {
        &self.last_content
    }

    /// Drains watcher events. Returns the new source if the file changed.
    pub fn check(&mut self) -> Option<String> {
        let name = self.path.file_name().unwrap_or_default();
        let mut touched = false;
        for event in self.events.try_iter() {
            match event {
                Ok(event) => touched |= event.paths.iter().any(|p| p.file_name() == Some(name)),
                Err(e) => warn!("shader watcher: {e}"),
            }
        }
        if touched {
            self.reload()
        } else {
            None
        }
    }

    /// Rereads the file. Returns its content if it differs from the last one.
    pub fn reload(&mut self) -> Option<String> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                debug!("could not read {}: {e}", self.path.display());
                return None;
            }
        };
        if content == self.last_content {
            return None;
        }
        self.last_content.clone_from(&content);
        info!("shader {} changed", self.path.display());
        Some(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reload_reports_only_changes() {
        let dir = std::env::temp_dir().join(format!("refract-hot-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("shader.wgsl");
        fs::write(&path, "// one").unwrap();

        let mut hot = ShaderHotReload::new(&path).unwrap();
        assert_eq!(hot.source(), "// one");
        assert_eq!(hot.reload(), None);

        fs::write(&path, "// two").unwrap();
        assert_eq!(hot.reload().as_deref(), Some("// two"));
        assert_eq!(hot.reload(), None);

        fs::remove_dir_all(&dir).unwrap();
    }
}
