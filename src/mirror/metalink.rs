//! Metalink XML parsing.
//!
//! Metalink documents name one target file (the manifest, `@name`), its
//! digests/size/timestamp, and a ranked list of mirror URLs, optionally
//! with `alternates` for other (size, hash) combinations of the same
//! filename. Parsed with `quick-xml`'s low-level reader rather than
//! building a DOM — metalink documents are small, but the event reader
//! keeps this consistent with how the rest of the crate avoids buffering
//! more than it needs to.

use quick_xml::events::Event;
use quick_xml::reader::Reader;

use crate::core::error::{Error, Result};

/// One ranked mirror URL entry inside a metalink.
#[derive(Debug, Clone, PartialEq)]
pub struct MetalinkUrl {
    pub url: String,
    pub url_type: Option<String>,
    pub protocol: Option<String>,
    pub location: Option<String>,
    pub preference: i32,
}

/// An alternate (timestamp, size, hashes) combination for the same
/// filename. Exposed verbatim; never merged into the trusted digest set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetalinkAlternate {
    pub timestamp: Option<i64>,
    pub size: Option<u64>,
    pub hashes: Vec<(String, String)>,
}

/// A parsed metalink document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metalink {
    pub filename: String,
    pub size: Option<u64>,
    pub hashes: Vec<(String, String)>,
    pub timestamp: Option<i64>,
    pub urls: Vec<MetalinkUrl>,
    pub alternates: Vec<MetalinkAlternate>,
}

fn attr_value(
    e: &quick_xml::events::BytesStart<'_>,
    name: &str,
) -> Result<Option<String>> {
    for attr in e.attributes() {
        let attr = attr.map_err(|err| Error::MlXml(err.to_string()))?;
        if attr.key.as_ref() == name.as_bytes() {
            let value = attr
                .unescape_value()
                .map_err(|err| Error::MlXml(err.to_string()))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn local_name(e: &quick_xml::events::BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

/// Parse a metalink document.
pub fn parse(content: &str) -> Result<Metalink> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut meta = Metalink::default();
    let mut text_buf = String::new();
    // Element name stack so we know whether a <hash>/<url>/<size>/<timestamp>
    // belongs to the primary <file> or to an <alternates> entry.
    let mut stack: Vec<String> = Vec::new();
    let mut in_alternates = false;
    let mut current_alt = MetalinkAlternate::default();
    let mut current_hash_type: Option<String> = None;

    loop {
        match reader
            .read_event()
            .map_err(|e| Error::MlXml(e.to_string()))?
        {
            Event::Start(e) | Event::Empty(e) => {
                let name = local_name(&e);
                match name.as_str() {
                    "file" => {
                        if let Some(n) = attr_value(&e, "name")? {
                            meta.filename = n;
                        }
                    }
                    "alternates" => {
                        in_alternates = true;
                    }
                    "alternate" => {
                        current_alt = MetalinkAlternate::default();
                    }
                    "hash" => {
                        current_hash_type = attr_value(&e, "type")?;
                    }
                    "url" => {
                        let url_type = attr_value(&e, "type")?;
                        let protocol = attr_value(&e, "protocol")?;
                        let location = attr_value(&e, "location")?;
                        let preference = attr_value(&e, "preference")?
                            .and_then(|v| v.parse::<i32>().ok())
                            .unwrap_or(0);
                        // Body text (the URL) is read on the following
                        // Text event for Start, or is absent for Empty.
                        stack.push("url".to_string());
                        meta.urls.push(MetalinkUrl {
                            url: String::new(),
                            url_type,
                            protocol,
                            location,
                            preference,
                        });
                        continue;
                    }
                    _ => {}
                }
                stack.push(name);
                text_buf.clear();
            }
            Event::Text(t) | Event::CData(t) => {
                let decoded = t
                    .decode()
                    .map_err(|e| Error::MlXml(e.to_string()))?;
                text_buf.push_str(decoded.trim());
            }
            Event::End(e) => {
                let name = local_name(&e);
                stack.pop();
                match name.as_str() {
                    "file" => {}
                    "alternates" => in_alternates = false,
                    "alternate" => {
                        meta.alternates.push(std::mem::take(&mut current_alt));
                    }
                    "size" => {
                        let size = text_buf.trim().parse::<u64>().ok();
                        if in_alternates {
                            current_alt.size = size;
                        } else {
                            meta.size = size;
                        }
                    }
                    "timestamp" => {
                        let ts = text_buf.trim().parse::<i64>().ok();
                        if in_alternates {
                            current_alt.timestamp = ts;
                        } else {
                            meta.timestamp = ts;
                        }
                    }
                    "hash" => {
                        if let Some(algo) = current_hash_type.take() {
                            let value = text_buf.trim().to_lowercase();
                            if in_alternates {
                                current_alt.hashes.push((algo, value));
                            } else {
                                meta.hashes.push((algo, value));
                            }
                        }
                    }
                    "url" => {
                        if let Some(last) = meta.urls.last_mut() {
                            last.url = text_buf.trim().to_string();
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

    if meta.filename.is_empty() && meta.urls.is_empty() {
        return Err(Error::MlXml(
            "document has no <file> element with a name".to_string(),
        ));
    }
    Ok(meta)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<metalink version="3.0" xmlns="http://www.metalinker.org/">
  <files>
    <file name="repomd.xml">
      <size>2621</size>
      <timestamp>1347459931</timestamp>
      <verification>
        <hash type="md5">f76409f67a84bcd516131d5cc98e57e1</hash>
        <hash type="sha256">bef5d33dc68f47adc7b31df448851b1e9e6bae27840f28700fff144881482a6a</hash>
      </verification>
      <resources>
        <url protocol="http" type="http" location="CZ" preference="100">http://good/repodata/repomd.xml</url>
        <url protocol="http" type="http" location="US" preference="90">http://bad/repodata/repomd.xml</url>
      </resources>
    </file>
  </files>
</metalink>"#;

    #[test]
    fn parses_filename_size_hashes_and_urls() {
        let m = parse(SAMPLE).unwrap();
        assert_eq!(m.filename, "repomd.xml");
        assert_eq!(m.size, Some(2621));
        assert_eq!(m.timestamp, Some(1_347_459_931));
        assert_eq!(
            m.hashes,
            vec![
                (
                    "md5".to_string(),
                    "f76409f67a84bcd516131d5cc98e57e1".to_string()
                ),
                (
                    "sha256".to_string(),
                    "bef5d33dc68f47adc7b31df448851b1e9e6bae27840f28700fff144881482a6a"
                        .to_string()
                ),
            ]
        );
        assert_eq!(m.urls.len(), 2);
        assert_eq!(m.urls[0].url, "http://good/repodata/repomd.xml");
        assert_eq!(m.urls[0].preference, 100);
        assert_eq!(m.urls[1].url, "http://bad/repodata/repomd.xml");
    }

    #[test]
    fn alternates_are_kept_separate_from_primary_hashes() {
        let xml = r#"<metalink><files><file name="primary.xml.gz">
            <size>100</size>
            <hash type="sha256">aaaa</hash>
            <alternates>
              <alternate>
                <size>200</size>
                <hash type="sha256">bbbb</hash>
              </alternate>
            </alternates>
            <resources><url preference="1">http://m/primary.xml.gz</url></resources>
        </file></files></metalink>"#;
        let m = parse(xml).unwrap();
        assert_eq!(m.size, Some(100));
        assert_eq!(m.hashes, vec![("sha256".to_string(), "aaaa".to_string())]);
        assert_eq!(m.alternates.len(), 1);
        assert_eq!(m.alternates[0].size, Some(200));
        assert_eq!(
            m.alternates[0].hashes,
            vec![("sha256".to_string(), "bbbb".to_string())]
        );
    }

    #[test]
    fn rejects_document_without_file_element() {
        assert!(parse("<metalink><files/></metalink>").is_err());
    }
}
