use crate::{PeerError, Result};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

/// Identity of a stored object: `content.type.revision`.
///
/// Every lifecycle state of a basket lives at a path derived from the
/// identity alone, so two peers sharing a storage layout agree on where a
/// basket is without any lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Basket {
    content: u64,
    kind: u32,
    revision: u32,
}

/// Where a basket currently is on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BasketState {
    Absent,
    Working,
    Archived,
    Deleted,
}

impl fmt::Display for BasketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Absent => "absent",
            Self::Working => "working",
            Self::Archived => "archived",
            Self::Deleted => "deleted",
        };
        f.write_str(name)
    }
}

impl Basket {
    pub fn new(content: u64, kind: u32, revision: u32) -> Self {
        Self {
            content,
            kind,
            revision,
        }
    }

    pub fn content(&self) -> u64 {
        self.content
    }

    pub fn kind(&self) -> u32 {
        self.kind
    }

    pub fn revision(&self) -> u32 {
        self.revision
    }

    pub fn archived_path(&self, root: &Path) -> PathBuf {
        self.state_dir(root, "a").join(self.to_string())
    }

    pub fn working_path(&self, root: &Path) -> PathBuf {
        self.state_dir(root, "w").join(self.to_string())
    }

    pub fn deleted_path(&self, root: &Path) -> PathBuf {
        self.state_dir(root, "d").join(self.to_string())
    }

    /// Accepts a caller-supplied working path only when it names an entry
    /// directly inside this basket's working fan-out directory.
    pub fn checked_working_path(&self, root: &Path, given: &str) -> Result<PathBuf> {
        let path = PathBuf::from(given);
        let inside = path.parent() == Some(self.state_dir(root, "w").as_path())
            && matches!(path.components().next_back(), Some(Component::Normal(_)));
        if inside {
            Ok(path)
        } else {
            Err(PeerError::BadRequest(format!(
                "working path outside {}: {}",
                self.state_dir(root, "w").display(),
                given
            )))
        }
    }

    /// Destination of a cancelled working directory; keeps the working
    /// directory's own file name so a caller-chosen working path survives.
    pub fn cancel_path(&self, root: &Path, working: &Path) -> PathBuf {
        let name = working
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_else(|| self.to_string().into());
        self.state_dir(root, "c").join(name)
    }

    fn state_dir(&self, root: &Path, state: &str) -> PathBuf {
        let c = self.content;
        root.join(self.kind.to_string())
            .join("baskets")
            .join(state)
            .join((c / 1_000_000_000).to_string())
            .join(format!("{:03}", (c / 1_000_000) % 1000))
            .join(format!("{:03}", (c / 1000) % 1000))
    }
}

impl fmt::Display for Basket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.content, self.kind, self.revision)
    }
}

impl FromStr for Basket {
    type Err = PeerError;

    fn from_str(text: &str) -> Result<Self> {
        let invalid = || PeerError::BadRequest(format!("invalid basket: {}", text));

        let mut fields = text.trim().split('.');
        let content = fields
            .next()
            .filter(|v| is_decimal(v))
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(invalid)?;
        let kind = fields
            .next()
            .filter(|v| is_decimal(v))
            .and_then(|v| v.parse::<u32>().ok())
            .ok_or_else(invalid)?;
        let revision = fields
            .next()
            .filter(|v| is_decimal(v))
            .and_then(|v| v.parse::<u32>().ok())
            .ok_or_else(invalid)?;

        if fields.next().is_some() {
            return Err(invalid());
        }

        Ok(Self::new(content, kind, revision))
    }
}

fn is_decimal(field: &str) -> bool {
    !field.is_empty() && field.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let basket: Basket = "1234567.1.2".parse().unwrap();
        assert_eq!(basket, Basket::new(1234567, 1, 2));
        assert_eq!(basket.to_string(), "1234567.1.2");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for text in [
            "", "1.2", "1.2.3.4", "a.1.2", "1.-1.2", "1..2", "+5.1.1", "5.+1.1", " 5.1.1x",
        ] {
            assert!(text.parse::<Basket>().is_err(), "accepted {:?}", text);
        }
    }

    #[test]
    fn test_paths_per_state() {
        let root = Path::new("/expdsk");
        let basket = Basket::new(1_234_567_890, 1, 2);

        assert_eq!(
            basket.archived_path(root),
            PathBuf::from("/expdsk/1/baskets/a/1/234/567/1234567890.1.2")
        );
        assert_eq!(
            basket.working_path(root),
            PathBuf::from("/expdsk/1/baskets/w/1/234/567/1234567890.1.2")
        );
        assert_eq!(
            basket.deleted_path(root),
            PathBuf::from("/expdsk/1/baskets/d/1/234/567/1234567890.1.2")
        );
    }

    #[test]
    fn test_checked_working_path() {
        let root = Path::new("/expdsk");
        let basket = Basket::new(42, 3, 1);

        let inside = "/expdsk/3/baskets/w/0/000/000/42.3.1.tmp";
        assert_eq!(
            basket.checked_working_path(root, inside).unwrap(),
            PathBuf::from(inside)
        );

        for outside in [
            "/tmp/victim",
            "victim",
            "/expdsk/3/baskets/a/0/000/000/42.3.1",
            "/expdsk/3/baskets/w/0/000/001/42.3.1",
            "/expdsk/3/baskets/w/0/000/000/..",
            "/expdsk/3/baskets/w/0/000/000/../../../a/0/000/000/42.3.1",
            "/expdsk/3/baskets/w/0/000/000",
        ] {
            assert!(
                matches!(
                    basket.checked_working_path(root, outside),
                    Err(PeerError::BadRequest(_))
                ),
                "accepted {}",
                outside
            );
        }
    }

    #[test]
    fn test_cancel_path_keeps_working_name() {
        let root = Path::new("/expdsk");
        let basket = Basket::new(42, 3, 1);
        let working = PathBuf::from("/expdsk/3/baskets/w/0/000/000/42.3.1.tmp");

        assert_eq!(
            basket.cancel_path(root, &working),
            PathBuf::from("/expdsk/3/baskets/c/0/000/000/42.3.1.tmp")
        );
    }
}
