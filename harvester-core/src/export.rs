use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

use crate::harvest::AggregateLinkSet;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to write {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
}

pub type ExportResult<T> = Result<T, ExportError>;

/// Shell dialect of the generated queue script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptPlatform {
    Windows,
    Unix,
}

impl ScriptPlatform {
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            ScriptPlatform::Windows
        } else {
            ScriptPlatform::Unix
        }
    }

    fn script_name(self) -> &'static str {
        match self {
            ScriptPlatform::Windows => "idm_queue.bat",
            ScriptPlatform::Unix => "idm_queue.sh",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExportArtifacts {
    pub links_path: PathBuf,
    pub script_path: PathBuf,
}

/// Serializes the final link set: `links.txt` (one URL per line, insertion
/// order) and a queue script with one enqueue command per URL. Both writes
/// are plain whole-file writes, so repeating them on the same set is
/// byte-identical.
#[derive(Debug, Clone)]
pub struct ExportWriter {
    idm_path: String,
    download_dir: String,
    platform: ScriptPlatform,
}

impl ExportWriter {
    pub fn new(idm_path: String, download_dir: String, platform: ScriptPlatform) -> Self {
        Self {
            idm_path,
            download_dir,
            platform,
        }
    }

    pub fn write(
        &self,
        links: &AggregateLinkSet,
        output_dir: &Path,
    ) -> ExportResult<ExportArtifacts> {
        fs::create_dir_all(output_dir).map_err(|source| ExportError::Io {
            source,
            path: output_dir.to_path_buf(),
        })?;

        let links_path = output_dir.join("links.txt");
        write_file(&links_path, &render_links(links))?;

        let script_path = output_dir.join(self.platform.script_name());
        let script = match self.platform {
            ScriptPlatform::Windows => self.render_batch_script(links),
            ScriptPlatform::Unix => self.render_shell_script(links),
        };
        write_file(&script_path, &script)?;

        info!(
            links = links.len(),
            links_path = %links_path.display(),
            script_path = %script_path.display(),
            "export artifacts written"
        );
        Ok(ExportArtifacts {
            links_path,
            script_path,
        })
    }

    fn render_batch_script(&self, links: &AggregateLinkSet) -> String {
        let idm_path = escape_batch(&self.idm_path);
        let download_dir = escape_batch(&self.download_dir);

        let mut script = String::new();
        script.push_str("@echo off\n");
        script.push_str("echo IDM Link Enqueue Script\n");
        script.push_str("echo ----------------------\n\n");
        script.push_str(&format!("set \"IDM_PATH={idm_path}\"\n"));
        script.push_str(&format!("set \"DOWNLOAD_DIR={download_dir}\"\n\n"));
        script.push_str("if not exist \"%IDM_PATH%\" (\n");
        script.push_str("    echo IDM executable not found at %IDM_PATH%\n");
        script.push_str("    echo Please edit this script with the correct path to IDMan.exe\n");
        script.push_str("    pause\n");
        script.push_str("    exit /b 1\n");
        script.push_str(")\n\n");
        for url in links.iter() {
            let url = escape_batch(url);
            script.push_str(&format!("echo Adding: {url}\n"));
            script.push_str(&format!(
                "\"%IDM_PATH%\" /d \"{url}\" /p \"%DOWNLOAD_DIR%\" /n /a\n"
            ));
            script.push_str("timeout /t 1 /nobreak >nul\n");
        }
        script.push_str("\necho All links have been added to the IDM queue.\n");
        script.push_str("echo Remember to start IDM to begin downloads.\npause\n");
        script
    }

    fn render_shell_script(&self, links: &AggregateLinkSet) -> String {
        let idm_path = escape_shell(&self.idm_path);
        let download_dir = escape_shell(&self.download_dir);

        let mut script = String::new();
        script.push_str("#!/bin/bash\n\n");
        script.push_str("echo \"IDM Link Enqueue Script\"\n");
        script.push_str("echo \"----------------------\"\n\n");
        script.push_str(&format!("IDM_PATH=\"{idm_path}\"\n"));
        script.push_str(&format!("DOWNLOAD_DIR=\"{download_dir}\"\n\n"));
        script.push_str("if [ ! -f \"$IDM_PATH\" ]; then\n");
        script.push_str("    echo \"IDM executable not found at $IDM_PATH\"\n");
        script.push_str("    echo \"Please edit this script with the correct path to IDMan\"\n");
        script.push_str("    exit 1\n");
        script.push_str("fi\n\n");
        for url in links.iter() {
            let url = escape_shell(url);
            script.push_str(&format!("echo \"Adding: {url}\"\n"));
            script.push_str(&format!(
                "\"$IDM_PATH\" /d \"{url}\" /p \"$DOWNLOAD_DIR\" /n /a\n"
            ));
            script.push_str("sleep 1\n");
        }
        script.push_str("\necho \"All links have been added to the IDM queue.\"\n");
        script.push_str("echo \"Remember to start IDM to begin downloads.\"\n");
        script
    }
}

fn render_links(links: &AggregateLinkSet) -> String {
    let mut out = String::new();
    for url in links.iter() {
        out.push_str(url);
        out.push('\n');
    }
    out
}

fn write_file(path: &Path, content: &str) -> ExportResult<()> {
    fs::write(path, content).map_err(|source| ExportError::Io {
        source,
        path: path.to_path_buf(),
    })
}

/// Escape a value embedded in a batch file. cmd.exe expands `%...%`
/// sequences even inside quotes, so literal percents (common in
/// percent-encoded URLs) must be doubled; quotes are doubled per batch
/// quoting rules.
fn escape_batch(value: &str) -> String {
    value.replace('%', "%%").replace('"', "\"\"")
}

/// Escape for interpolation inside a double-quoted bash string.
fn escape_shell(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '"' | '$' | '`' | '\\' => {
                out.push('\\');
                out.push(ch);
            }
            other => out.push(other),
        }
    }
    out
}
