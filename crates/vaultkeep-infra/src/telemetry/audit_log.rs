use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use vaultkeep_core::{AppError, AppResult};

/// Last `lines` lines of the audit log, oldest first. A log that does not
/// exist yet reads as empty.
pub fn tail_log(path: &Path, lines: usize) -> AppResult<Vec<String>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(AppError::io(format!("opening {}", path.display()), e)),
    };

    if lines == 0 {
        return Ok(Vec::new());
    }
    let mut tail = VecDeque::with_capacity(lines.min(4096));
    for line in BufReader::new(file).split(b'\n') {
        let line = line.map_err(|e| AppError::io(format!("reading {}", path.display()), e))?;
        if tail.len() == lines {
            tail.pop_front();
        }
        tail.push_back(String::from_utf8_lossy(&line).trim_end_matches('\r').to_string());
    }
    Ok(tail.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_tail_returns_last_lines_in_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("manager.log");
        let content: String = (1..=150).map(|i| format!("line {}\n", i)).collect();
        std::fs::write(&path, content).unwrap();

        let tail = tail_log(&path, 100).unwrap();
        assert_eq!(tail.len(), 100);
        assert_eq!(tail[0], "line 51");
        assert_eq!(tail[99], "line 150");

        assert_eq!(tail_log(&path, 2).unwrap(), vec!["line 149", "line 150"]);
        assert!(tail_log(&path, 0).unwrap().is_empty());
    }

    #[test]
    fn test_missing_log_is_empty() {
        let dir = tempdir().unwrap();
        assert!(tail_log(&dir.path().join("manager.log"), 10).unwrap().is_empty());
    }
}
