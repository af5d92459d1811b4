// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Tunnistin - File Sink
 * TXT / CSV / JSON result writer with fixed CSV schema and BOM
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::Serialize;

use crate::errors::ScannerError;
use crate::techdetect::TechStack;
use crate::types::TargetResult;

const CSV_HEADER: &[&str] = &[
    "URL",
    "Status",
    "Title",
    "Server",
    "WebServers",
    "JSFrameworks",
    "JSLibraries",
    "WebFrameworks",
    "Languages",
    "FingerIDs",
    "FingerNames",
    "Headers",
    "Match",
    "Remark",
];

const TXT_RULER_WIDTH: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Txt,
    Csv,
    Json,
}

impl OutputFormat {
    /// `--json` forces JSON; otherwise the file extension decides, with
    /// txt as the fallback.
    pub fn resolve(json_flag: bool, path: &Path) -> Self {
        if json_flag {
            return OutputFormat::Json;
        }
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => OutputFormat::Csv,
            _ => OutputFormat::Txt,
        }
    }
}

/// One result line in JSON output (and on the socket sink).
#[derive(Debug, Serialize)]
pub struct JsonRecord<'a> {
    pub url: &'a str,
    pub status_code: i32,
    pub title: &'a str,
    pub server: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub finger_ids: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub finger_names: Vec<String>,
    #[serde(skip_serializing_if = "str::is_empty")]
    pub headers: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wappalyzer: Option<&'a TechStack>,
    pub match_result: bool,
    #[serde(skip_serializing_if = "str::is_empty")]
    pub remark: &'a str,
}

/// Field bag shared by the file and socket sinks.
pub struct ResultFields {
    pub url: String,
    pub status_code: i32,
    pub title: String,
    pub server: String,
    pub finger_ids: Vec<String>,
    pub finger_names: Vec<String>,
    pub headers: String,
    pub technologies: Option<TechStack>,
    pub matched: bool,
    pub remark: String,
}

impl ResultFields {
    pub fn from_result(result: &TargetResult) -> Self {
        let finger_ids: Vec<String> = result
            .matches
            .iter()
            .map(|m| m.finger.id.clone())
            .collect();
        let finger_names: Vec<String> = result
            .matches
            .iter()
            .map(|m| m.finger.info.name.clone())
            .collect();
        let headers = result
            .last_response
            .as_ref()
            .map(|r| String::from_utf8_lossy(&r.raw_header).into_owned())
            .unwrap_or_default();
        let remark = format!("{} fingerprints matched", result.matches.len());
        Self {
            url: result.url.clone(),
            status_code: result.status_code,
            title: result.title.clone(),
            server: result.server.product.clone(),
            finger_ids,
            finger_names,
            headers,
            technologies: result.technologies.clone(),
            matched: !result.matches.is_empty(),
            remark,
        }
    }

    pub fn to_json_line(&self) -> Result<String, ScannerError> {
        let record = JsonRecord {
            url: &self.url,
            status_code: self.status_code,
            title: &self.title,
            server: &self.server,
            finger_ids: self.finger_ids.clone(),
            finger_names: self.finger_names.clone(),
            headers: &self.headers,
            wappalyzer: self.technologies.as_ref(),
            match_result: self.matched,
            remark: &self.remark,
        };
        serde_json::to_string(&record).map_err(|e| ScannerError::Output(e.to_string()))
    }
}

/// Thread-safe result file writer.
pub struct FileSink {
    path: PathBuf,
    format: OutputFormat,
    file: Mutex<File>,
}

impl FileSink {
    /// Open (or create) the output file. New CSV files start with a
    /// UTF-8 BOM and the fixed header row.
    pub fn open(path: &Path, format: OutputFormat) -> Result<Self, ScannerError> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)
                    .map_err(|e| ScannerError::Output(format!("{}: {}", dir.display(), e)))?;
            }
        }

        let existed = path.exists();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| ScannerError::Output(format!("{}: {}", path.display(), e)))?;

        if !existed && format == OutputFormat::Csv {
            file.write_all(&[0xEF, 0xBB, 0xBF])
                .map_err(|e| ScannerError::Output(e.to_string()))?;
            let mut w = csv::Writer::from_writer(&mut file);
            w.write_record(CSV_HEADER)
                .map_err(|e| ScannerError::Output(e.to_string()))?;
            w.flush().map_err(|e| ScannerError::Output(e.to_string()))?;
        }

        Ok(Self {
            path: path.to_path_buf(),
            format,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, fields: &ResultFields) -> Result<(), ScannerError> {
        match self.format {
            OutputFormat::Json => self.write_json(fields),
            OutputFormat::Csv => self.write_csv(fields),
            OutputFormat::Txt => self.write_txt(fields),
        }
    }

    fn write_json(&self, fields: &ResultFields) -> Result<(), ScannerError> {
        let line = fields.to_json_line()?;
        let mut file = self.file.lock();
        writeln!(file, "{}", line).map_err(|e| ScannerError::Output(e.to_string()))
    }

    fn write_csv(&self, fields: &ResultFields) -> Result<(), ScannerError> {
        let tech = fields.technologies.clone().unwrap_or_default();
        let mut file = self.file.lock();
        let mut w = csv::Writer::from_writer(&mut *file);
        w.write_record(&[
            fields.url.as_str(),
            &fields.status_code.to_string(),
            &fields.title,
            &fields.server,
            &join_or_dash(&tech.web_servers),
            &join_or_dash(&tech.javascript_frameworks),
            &join_or_dash(&tech.javascript_libraries),
            &join_or_dash(&tech.web_frameworks),
            &join_or_dash(&tech.programming_languages),
            &bracketed(&fields.finger_ids),
            &bracketed(&fields.finger_names),
            &fields.headers.replace('\n', "\\n"),
            &fields.matched.to_string(),
            &fields.remark,
        ])
        .map_err(|e| ScannerError::Output(e.to_string()))?;
        w.flush().map_err(|e| ScannerError::Output(e.to_string()))
    }

    fn write_txt(&self, fields: &ResultFields) -> Result<(), ScannerError> {
        let tech = fields.technologies.clone().unwrap_or_default();
        let mut block = String::with_capacity(512 + fields.headers.len());
        block.push_str(&format!("URL: {}\n", fields.url));
        block.push_str(&format!("Status: {}\n", fields.status_code));
        block.push_str(&format!("Title: {}\n", fields.title));
        block.push_str(&format!("Server: {}\n", fields.server));
        block.push_str(&format!("Tech: {}\n", tech_summary(&tech)));
        block.push_str(&format!("FingerIDs: {}\n", bracketed(&fields.finger_ids)));
        block.push_str(&format!(
            "FingerNames: {}\n",
            bracketed(&fields.finger_names)
        ));
        block.push_str(&format!("Match: {}\n", fields.matched));
        block.push_str(&format!("Remark: {}\n", fields.remark));
        block.push_str(&format!("Headers:\n{}\n", fields.headers));
        block.push_str(&"-".repeat(TXT_RULER_WIDTH));
        block.push('\n');

        let mut file = self.file.lock();
        file.write_all(block.as_bytes())
            .map_err(|e| ScannerError::Output(e.to_string()))
    }
}

fn join_or_dash(items: &[String]) -> String {
    if items.is_empty() {
        "-".to_string()
    } else {
        items.join(", ")
    }
}

fn bracketed(items: &[String]) -> String {
    format!("[{}]", items.join(", "))
}

fn tech_summary(tech: &TechStack) -> String {
    let mut parts = Vec::new();
    if !tech.web_servers.is_empty() {
        parts.push(format!("WebServers: {}", tech.web_servers.join(", ")));
    }
    if !tech.programming_languages.is_empty() {
        parts.push(format!("Languages: {}", tech.programming_languages.join(", ")));
    }
    if !tech.web_frameworks.is_empty() {
        parts.push(format!("WebFrameworks: {}", tech.web_frameworks.join(", ")));
    }
    let js: Vec<String> = tech
        .javascript_frameworks
        .iter()
        .chain(tech.javascript_libraries.iter())
        .cloned()
        .collect();
    if !js.is_empty() {
        parts.push(format!("JS: {}", js.join(", ")));
    }
    if parts.is_empty() {
        "-".to_string()
    } else {
        parts.join(" | ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_fields() -> ResultFields {
        ResultFields {
            url: "http://example.com".into(),
            status_code: 200,
            title: "Welcome".into(),
            server: "nginx".into(),
            finger_ids: vec!["nginx".into()],
            finger_names: vec!["Nginx".into()],
            headers: "HTTP/1.1 200 OK\nserver: nginx".into(),
            technologies: None,
            matched: true,
            remark: "1 fingerprints matched".into(),
        }
    }

    #[test]
    fn test_format_resolution() {
        assert_eq!(
            OutputFormat::resolve(false, Path::new("out.csv")),
            OutputFormat::Csv
        );
        assert_eq!(
            OutputFormat::resolve(false, Path::new("out.txt")),
            OutputFormat::Txt
        );
        assert_eq!(
            OutputFormat::resolve(true, Path::new("out.txt")),
            OutputFormat::Json
        );
    }

    #[test]
    fn test_csv_starts_with_bom_and_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let sink = FileSink::open(&path, OutputFormat::Csv).unwrap();
        sink.write(&sample_fields()).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..3], &[0xEF, 0xBB, 0xBF]);
        let text = String::from_utf8_lossy(&bytes[3..]).into_owned();
        let mut lines = text.lines();
        assert!(lines.next().unwrap().starts_with("URL,Status,Title,Server"));
        let row = lines.next().unwrap();
        assert!(row.contains("http://example.com"));
        // Newlines in headers are escaped for CSV.
        assert!(row.contains("\\n"));
    }

    #[test]
    fn test_json_one_object_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        let sink = FileSink::open(&path, OutputFormat::Json).unwrap();
        sink.write(&sample_fields()).unwrap();
        sink.write(&sample_fields()).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            let v: serde_json::Value = serde_json::from_str(line).unwrap();
            assert_eq!(v["url"], "http://example.com");
            assert_eq!(v["status_code"], 200);
            assert_eq!(v["match_result"], true);
            assert_eq!(v["finger_ids"][0], "nginx");
        }
    }

    #[test]
    fn test_txt_blocks_ruled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let sink = FileSink::open(&path, OutputFormat::Txt).unwrap();
        sink.write(&sample_fields()).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("URL: http://example.com"));
        assert!(text.contains(&"-".repeat(100)));
    }

    #[test]
    fn test_append_does_not_duplicate_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        {
            let sink = FileSink::open(&path, OutputFormat::Csv).unwrap();
            sink.write(&sample_fields()).unwrap();
        }
        {
            let sink = FileSink::open(&path, OutputFormat::Csv).unwrap();
            sink.write(&sample_fields()).unwrap();
        }
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.matches("URL,Status").count(), 1);
    }
}
