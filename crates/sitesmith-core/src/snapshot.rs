//! Page snapshots and their on-disk directory convention
//!
//! A snapshot is the triple of generated sources (markup, styles, script)
//! for one version of one session. Snapshots are immutable once superseded,
//! with a single documented exception: direct historical-version edits
//! requested by the user. Each version lives in its own directory alongside
//! the conversation logs and any generated image assets for that version.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::errors::StoreError;

/// The three generated source files of a page, keyed by their on-disk names.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageFile {
    #[serde(rename = "index.html")]
    Markup,
    #[serde(rename = "styles.css")]
    Styles,
    #[serde(rename = "script.js")]
    Script,
}

impl PageFile {
    pub const ALL: [PageFile; 3] = [PageFile::Markup, PageFile::Styles, PageFile::Script];

    pub fn file_name(&self) -> &'static str {
        match self {
            PageFile::Markup => "index.html",
            PageFile::Styles => "styles.css",
            PageFile::Script => "script.js",
        }
    }

    pub fn from_name(name: &str) -> Option<PageFile> {
        match name {
            "index.html" => Some(PageFile::Markup),
            "styles.css" => Some(PageFile::Styles),
            "script.js" => Some(PageFile::Script),
            _ => None,
        }
    }
}

impl std::fmt::Display for PageFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.file_name())
    }
}

/// An immutable triple of UTF-8 sources for one `(session, version)`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct FileSnapshot {
    pub markup: String,
    pub styles: String,
    pub script: String,
}

impl FileSnapshot {
    pub fn get(&self, file: PageFile) -> &str {
        match file {
            PageFile::Markup => &self.markup,
            PageFile::Styles => &self.styles,
            PageFile::Script => &self.script,
        }
    }

    pub fn set(&mut self, file: PageFile, content: String) {
        match file {
            PageFile::Markup => self.markup = content,
            PageFile::Styles => self.styles = content,
            PageFile::Script => self.script = content,
        }
    }

    /// The blank page every fresh session starts from as version 0.
    pub fn starter() -> Self {
        FileSnapshot {
            markup: concat!(
                "<!DOCTYPE html>\n",
                "<html lang=\"en\">\n",
                "<head>\n",
                "  <meta charset=\"UTF-8\">\n",
                "  <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n",
                "  <title>New Page</title>\n",
                "  <link rel=\"stylesheet\" href=\"styles.css\">\n",
                "</head>\n",
                "<body>\n",
                "  <main id=\"app\"></main>\n",
                "  <script src=\"script.js\"></script>\n",
                "</body>\n",
                "</html>\n"
            )
            .to_string(),
            styles: ":root {\n  color-scheme: light dark;\n}\n".to_string(),
            script: "// page script\n".to_string(),
        }
    }

    /// Reads a snapshot from a version directory.
    pub async fn read_dir(dir: &Path) -> Result<FileSnapshot, StoreError> {
        let mut snapshot = FileSnapshot {
            markup: String::new(),
            styles: String::new(),
            script: String::new(),
        };
        for file in PageFile::ALL {
            let content = fs::read_to_string(dir.join(file.file_name())).await?;
            snapshot.set(file, content);
        }
        Ok(snapshot)
    }

    /// Writes all three files into a version directory, creating it if needed.
    pub async fn write_dir(&self, dir: &Path) -> Result<(), StoreError> {
        fs::create_dir_all(dir).await?;
        for file in PageFile::ALL {
            fs::write(dir.join(file.file_name()), self.get(file)).await?;
        }
        Ok(())
    }
}
