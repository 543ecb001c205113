//! `repomd.xml` parsing (spec §3 `Result.records`, §4.5 phase 2).

use quick_xml::events::Event;
use quick_xml::reader::Reader;
use serde::Serialize;

use crate::core::error::{Error, Result};

/// One entry from `repomd.xml`'s `<data type="...">` blocks.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecordInfo {
    pub record_type: String,
    pub href: String,
    pub checksum: String,
    pub checksum_type: String,
    pub open_checksum: Option<String>,
    pub open_checksum_type: Option<String>,
    pub size: Option<u64>,
    pub open_size: Option<u64>,
    pub timestamp: Option<i64>,
    pub db_version: Option<u32>,
}

/// The parsed manifest (spec §3 `Result` fields sourced from `repomd.xml`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Repomd {
    pub revision: Option<String>,
    pub repo_tags: Vec<String>,
    pub content_tags: Vec<String>,
    pub distro_tags: Vec<(Option<String>, String)>,
    pub records: Vec<RecordInfo>,
}

fn attr_value(e: &quick_xml::events::BytesStart<'_>, name: &str) -> Result<Option<String>> {
    for attr in e.attributes() {
        let attr = attr.map_err(|err| Error::RepomdXml(err.to_string()))?;
        if attr.key.as_ref() == name.as_bytes() {
            let value = attr
                .unescape_value()
                .map_err(|err| Error::RepomdXml(err.to_string()))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn local_name(e: &quick_xml::events::BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

/// Parse a `repomd.xml` document into its record map (spec §4.5 phase 2).
pub fn parse(content: &str) -> Result<Repomd> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut repomd = Repomd::default();
    let mut text_buf = String::new();
    let mut current: Option<RecordInfo> = None;
    let mut current_distro_cpeid: Option<String> = None;

    loop {
        match reader
            .read_event()
            .map_err(|e| Error::RepomdXml(e.to_string()))?
        {
            Event::Start(e) | Event::Empty(e) => {
                let name = local_name(&e);
                match name.as_str() {
                    "data" => {
                        let record_type = attr_value(&e, "type")?.unwrap_or_default();
                        current = Some(RecordInfo {
                            record_type,
                            ..RecordInfo::default()
                        });
                    }
                    "location" => {
                        if let Some(rec) = current.as_mut() {
                            rec.href = attr_value(&e, "href")?.unwrap_or_default();
                        }
                    }
                    "checksum" => {
                        if let Some(rec) = current.as_mut() {
                            rec.checksum_type = attr_value(&e, "type")?.unwrap_or_default();
                        }
                    }
                    "open-checksum" => {
                        if let Some(rec) = current.as_mut() {
                            rec.open_checksum_type = attr_value(&e, "type")?;
                        }
                    }
                    "database_version" => {}
                    "tags" | "repomd" | "data/size" => {}
                    "cpeid" => {
                        current_distro_cpeid = None;
                    }
                    "distro" => {
                        current_distro_cpeid = attr_value(&e, "cpeid")?;
                    }
                    _ => {}
                }
                text_buf.clear();
            }
            Event::Text(t) | Event::CData(t) => {
                let decoded = t.decode().map_err(|e| Error::RepomdXml(e.to_string()))?;
                text_buf.push_str(decoded.trim());
            }
            Event::End(e) => {
                let name = local_name(&e);
                match name.as_str() {
                    "data" => {
                        if let Some(rec) = current.take() {
                            repomd.records.push(rec);
                        }
                    }
                    "revision" => repomd.revision = Some(text_buf.trim().to_string()),
                    "repo" => repomd.repo_tags.push(text_buf.trim().to_string()),
                    "content" => repomd.content_tags.push(text_buf.trim().to_string()),
                    "distro" => {
                        repomd
                            .distro_tags
                            .push((current_distro_cpeid.take(), text_buf.trim().to_string()));
                    }
                    "checksum" => {
                        if let Some(rec) = current.as_mut() {
                            rec.checksum = text_buf.trim().to_string();
                        }
                    }
                    "open-checksum" => {
                        if let Some(rec) = current.as_mut() {
                            rec.open_checksum = Some(text_buf.trim().to_string());
                        }
                    }
                    "size" => {
                        if let Some(rec) = current.as_mut() {
                            rec.size = text_buf.trim().parse::<u64>().ok();
                        }
                    }
                    "open-size" => {
                        if let Some(rec) = current.as_mut() {
                            rec.open_size = text_buf.trim().parse::<u64>().ok();
                        }
                    }
                    "timestamp" => {
                        if let Some(rec) = current.as_mut() {
                            rec.timestamp = text_buf.trim().parse::<i64>().ok();
                        }
                    }
                    "database_version" => {
                        if let Some(rec) = current.as_mut() {
                            rec.db_version = text_buf.trim().parse::<u32>().ok();
                        }
                    }
                    _ => {}
                }
                text_buf.clear();
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if repomd.records.is_empty() {
        return Err(Error::RepomdXml(
            "document has no <data> records".to_string(),
        ));
    }
    Ok(repomd)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<repomd xmlns="http://linux.duke.edu/metadata/repo">
  <revision>1700000000</revision>
  <tags>
    <repo>Fedora</repo>
    <content>binary-x86_64</content>
    <distro cpeid="cpe:/o:fedoraproject:fedora:39">Fedora 39</distro>
  </tags>
  <data type="primary">
    <checksum type="sha256">aaaabbbbcccc</checksum>
    <open-checksum type="sha256">ddddeeeeffff</open-checksum>
    <location href="repodata/abc-primary.xml.gz"/>
    <timestamp>1699999999</timestamp>
    <size>1234</size>
    <open-size>5678</open-size>
  </data>
  <data type="filelists">
    <checksum type="sha256">111122223333</checksum>
    <location href="repodata/abc-filelists.xml.gz"/>
    <timestamp>1699999990</timestamp>
    <size>999</size>
  </data>
</repomd>"#;

    #[test]
    fn parses_tags_and_records() {
        let repomd = parse(SAMPLE).unwrap();
        assert_eq!(repomd.revision.as_deref(), Some("1700000000"));
        assert_eq!(repomd.repo_tags, vec!["Fedora".to_string()]);
        assert_eq!(repomd.content_tags, vec!["binary-x86_64".to_string()]);
        assert_eq!(
            repomd.distro_tags,
            vec![(
                Some("cpe:/o:fedoraproject:fedora:39".to_string()),
                "Fedora 39".to_string()
            )]
        );
        assert_eq!(repomd.records.len(), 2);
        let primary = &repomd.records[0];
        assert_eq!(primary.record_type, "primary");
        assert_eq!(primary.href, "repodata/abc-primary.xml.gz");
        assert_eq!(primary.checksum, "aaaabbbbcccc");
        assert_eq!(primary.checksum_type, "sha256");
        assert_eq!(primary.open_checksum.as_deref(), Some("ddddeeeeffff"));
        assert_eq!(primary.size, Some(1234));
        assert_eq!(primary.open_size, Some(5678));
        assert_eq!(primary.timestamp, Some(1_699_999_999));
    }

    #[test]
    fn rejects_document_without_records() {
        assert!(parse("<repomd><tags/></repomd>").is_err());
    }
}
