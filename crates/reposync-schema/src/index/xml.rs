use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use super::{IndexError, IndexParser, IndexReceiver};
use crate::types::RepoId;

/// Adapts quick-xml reader events to an [`IndexParser`].
///
/// The reader itself guarantees well-formedness (matching end tags, valid
/// escapes); this type only tracks nesting depth so a truncated stream is
/// reported instead of silently accepted.
#[derive(Debug)]
pub struct IndexDocument {
    parser: IndexParser,
    depth: usize,
}

impl IndexDocument {
    /// Start a document for the given repository.
    pub fn new(repo_id: RepoId) -> Self {
        Self {
            parser: IndexParser::new(repo_id),
            depth: 0,
        }
    }

    /// Feed one reader event. Returns `Ok(false)` once the end of input is reached.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError`] if the event cannot be decoded or the input ends
    /// while elements are still open.
    pub fn feed<R: IndexReceiver + ?Sized>(
        &mut self,
        event: Event<'_>,
        receiver: &mut R,
    ) -> Result<bool, IndexError> {
        match event {
            Event::Start(e) => {
                let (name, attrs) = decode_start(&e)?;
                self.depth += 1;
                self.parser.start_element(&name, &attrs);
            }
            Event::Empty(e) => {
                let (name, attrs) = decode_start(&e)?;
                self.parser.start_element(&name, &attrs);
                self.parser.end_element(&name, receiver);
            }
            Event::End(e) => {
                let local = e.local_name();
                let name = utf8(local.as_ref())?;
                self.depth = self.depth.saturating_sub(1);
                self.parser.end_element(name, receiver);
            }
            Event::Text(t) => {
                self.parser.text(&t.unescape()?);
            }
            Event::CData(c) => {
                let raw = c.into_inner();
                self.parser.text(utf8(&raw)?);
            }
            Event::Eof => {
                if self.depth > 0 {
                    return Err(IndexError::Truncated(self.depth));
                }
                return Ok(false);
            }
            _ => {}
        }
        Ok(true)
    }
}

/// Parse a complete in-memory document, pushing records to `receiver`.
///
/// # Errors
///
/// Returns [`IndexError`] if the document is not well-formed.
///
/// # Example
///
/// ```
/// use reposync_schema::RepoId;
/// use reposync_schema::index::{IndexRecord, parse_slice};
///
/// let xml = br#"<repo pubkey="ABC"><application id="org.x"/></repo>"#;
/// let mut records: Vec<IndexRecord> = Vec::new();
/// parse_slice(xml, RepoId::new(1), &mut records).unwrap();
/// assert_eq!(records.len(), 2);
/// ```
pub fn parse_slice<R: IndexReceiver + ?Sized>(
    bytes: &[u8],
    repo_id: RepoId,
    receiver: &mut R,
) -> Result<(), IndexError> {
    let mut reader = Reader::from_reader(bytes);
    let mut document = IndexDocument::new(repo_id);
    let mut buf = Vec::new();

    loop {
        let event = reader.read_event_into(&mut buf)?;
        if !document.feed(event, receiver)? {
            return Ok(());
        }
        buf.clear();
    }
}

fn decode_start(e: &BytesStart<'_>) -> Result<(String, Vec<(String, String)>), IndexError> {
    let name = utf8(e.local_name().as_ref())?.to_string();
    let mut attrs = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| IndexError::Malformed(err.to_string()))?;
        let key = utf8(attr.key.local_name().as_ref())?.to_string();
        let value = attr.unescape_value()?.into_owned();
        attrs.push((key, value));
    }
    Ok((name, attrs))
}

fn utf8(bytes: &[u8]) -> Result<&str, IndexError> {
    std::str::from_utf8(bytes).map_err(|err| IndexError::Malformed(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::HashAlgorithm;
    use crate::index::IndexRecord;
    use crate::types::{ApplicationRecord, PackageRecord};

    fn parse(xml: &str) -> Vec<IndexRecord> {
        let mut out = Vec::new();
        parse_slice(xml.as_bytes(), RepoId::new(5), &mut out).unwrap();
        out
    }

    fn apps(records: &[IndexRecord]) -> Vec<(&ApplicationRecord, &[PackageRecord])> {
        records
            .iter()
            .filter_map(|r| match r {
                IndexRecord::Application(app, pkgs) => Some((app, pkgs.as_slice())),
                IndexRecord::Repository(_) => None,
            })
            .collect()
    }

    fn single_package(xml_packages: &str) -> PackageRecord {
        let xml = format!(
            r#"<repo><application id="org.x"><package>{xml_packages}</package></application></repo>"#
        );
        let records = parse(&xml);
        let apps = apps(&records);
        apps[0].1[0].clone()
    }

    #[test]
    fn sample_document() {
        let records = parse(
            r#"<repo pubkey="ABC" version="1"><application id="org.x"><package><versioncode>3</versioncode><hash type="sha256">deadbeef</hash></package></application></repo>"#,
        );

        let apps = apps(&records);
        assert_eq!(apps.len(), 1);
        let (app, packages) = apps[0];
        assert_eq!(app.id, "org.x");
        assert_eq!(packages.len(), 1);
        assert_eq!(packages[0].vercode, 3);
        assert_eq!(packages[0].hash.as_deref(), Some("deadbeef"));
        assert_eq!(packages[0].hash_type, Some(HashAlgorithm::Sha256));
        assert_eq!(packages[0].hash_type.map(HashAlgorithm::as_str), Some("SHA-256"));

        let Some(IndexRecord::Repository(meta)) = records.last() else {
            panic!("repository metadata must be emitted last");
        };
        assert_eq!(meta.signing_cert.as_deref(), Some("ABC"));
        assert_eq!(meta.format_version, 1);
        assert_eq!(meta.max_age, -1);
    }

    #[test]
    fn legacy_then_modern_hash_keeps_modern() {
        let pkg = single_package(r#"<hash>aaa</hash><hash type="sha256">bbb</hash>"#);
        assert_eq!(pkg.hash.as_deref(), Some("bbb"));
        assert_eq!(pkg.hash_type, Some(HashAlgorithm::Sha256));
    }

    #[test]
    fn modern_then_legacy_hash_keeps_modern() {
        let pkg = single_package(r#"<hash type="sha256">bbb</hash><hash type="md5">aaa</hash>"#);
        assert_eq!(pkg.hash.as_deref(), Some("bbb"));
        assert_eq!(pkg.hash_type, Some(HashAlgorithm::Sha256));
    }

    #[test]
    fn two_legacy_hashes_first_wins() {
        let pkg = single_package(r#"<hash>first</hash><hash type="md5">second</hash>"#);
        assert_eq!(pkg.hash.as_deref(), Some("first"));
        assert_eq!(pkg.hash_type, Some(HashAlgorithm::Md5));
    }

    #[test]
    fn unknown_hash_type_is_ignored() {
        let pkg = single_package(r#"<hash type="crc32">zzz</hash>"#);
        assert!(pkg.hash.is_none());
        assert!(pkg.hash_type.is_none());
    }

    #[test]
    fn packages_follow_declaration_order_per_application() {
        let records = parse(
            r#"<repo>
                <application id="a">
                    <package><versioncode>2</versioncode></package>
                    <package><versioncode>1</versioncode></package>
                </application>
                <application id="b">
                    <package><versioncode>9</versioncode></package>
                </application>
                <application id="c"></application>
            </repo>"#,
        );
        let apps = apps(&records);
        let summary: Vec<(&str, Vec<i32>)> = apps
            .iter()
            .map(|(app, pkgs)| (app.id.as_str(), pkgs.iter().map(|p| p.vercode).collect()))
            .collect();
        assert_eq!(
            summary,
            vec![("a", vec![2, 1]), ("b", vec![9]), ("c", vec![])]
        );
    }

    #[test]
    fn package_fields_map_with_sentinels() {
        let pkg = single_package(
            r"
            <version> 1.2 </version>
            <versioncode>abc</versioncode>
            <size>not-a-number</size>
            <sig>cafe</sig>
            <srcname>x_src.tar.gz</srcname>
            <apkname>x_12.apk</apkname>
            <sdkver>14</sdkver>
            <maxsdkver>oops</maxsdkver>
            <added>someday</added>
            <permissions>INTERNET,CAMERA</permissions>
            <features>android.hardware.camera</features>
            <nativecode>arm64-v8a,x86</nativecode>
            ",
        );
        assert_eq!(pkg.version.as_deref(), Some("1.2"));
        assert_eq!(pkg.vercode, -1);
        assert_eq!(pkg.size, 0);
        assert_eq!(pkg.sig.as_deref(), Some("cafe"));
        assert_eq!(pkg.src_name.as_deref(), Some("x_src.tar.gz"));
        assert_eq!(pkg.apk_name.as_deref(), Some("x_12.apk"));
        assert_eq!(pkg.min_sdk, 14);
        assert_eq!(pkg.max_sdk, 0);
        assert!(pkg.added.is_none());
        assert_eq!(
            pkg.permissions.unwrap().as_slice(),
            ["INTERNET", "CAMERA"]
        );
        assert!(pkg.features.unwrap().contains("android.hardware.camera"));
        assert_eq!(pkg.native_code.unwrap().to_joined(), "arm64-v8a,x86");
        assert_eq!(pkg.repo_id, RepoId::new(5));
    }

    #[test]
    fn application_fields_and_description_precedence() {
        let records = parse(
            r#"<repo><application id="org.x">
                <name>X</name>
                <summary>Does x</summary>
                <description>old style</description>
                <desc>&lt;p&gt;new style&lt;/p&gt;</desc>
                <license>GPL-3.0</license>
                <web>https://x.org</web>
                <source>https://git.x.org</source>
                <tracker>https://git.x.org/issues</tracker>
                <changelog>https://x.org/changes</changelog>
                <donate>https://x.org/donate</donate>
                <bitcoin>1abc</bitcoin>
                <litecoin>Labc</litecoin>
                <dogecoin>Dabc</dogecoin>
                <flattr>123</flattr>
                <icon>org.x.png</icon>
                <added>2014-01-02</added>
                <lastupdated>2015-03-04</lastupdated>
                <marketversion>2.0</marketversion>
                <marketvercode>20</marketvercode>
                <categories>System,Internet</categories>
                <antifeatures>Ads</antifeatures>
                <requirements>root</requirements>
            </application></repo>"#,
        );
        let (app, _) = apps(&records)[0];
        assert_eq!(app.name.as_deref(), Some("X"));
        assert_eq!(app.summary.as_deref(), Some("Does x"));
        assert_eq!(app.description.as_deref(), Some("<p>new style</p>"));
        assert_eq!(app.license.as_deref(), Some("GPL-3.0"));
        assert_eq!(app.web_url.as_deref(), Some("https://x.org"));
        assert_eq!(app.source_url.as_deref(), Some("https://git.x.org"));
        assert_eq!(app.tracker_url.as_deref(), Some("https://git.x.org/issues"));
        assert_eq!(app.changelog_url.as_deref(), Some("https://x.org/changes"));
        assert_eq!(app.donate_url.as_deref(), Some("https://x.org/donate"));
        assert_eq!(app.bitcoin_addr.as_deref(), Some("1abc"));
        assert_eq!(app.litecoin_addr.as_deref(), Some("Labc"));
        assert_eq!(app.dogecoin_addr.as_deref(), Some("Dabc"));
        assert_eq!(app.flattr_id.as_deref(), Some("123"));
        assert_eq!(app.icon.as_deref(), Some("org.x.png"));
        assert_eq!(app.added, chrono::NaiveDate::from_ymd_opt(2014, 1, 2));
        assert_eq!(app.last_updated, chrono::NaiveDate::from_ymd_opt(2015, 3, 4));
        assert_eq!(app.upstream_version.as_deref(), Some("2.0"));
        assert_eq!(app.upstream_vercode, 20);
        assert_eq!(app.categories.as_ref().unwrap().as_slice(), ["System", "Internet"]);
        assert!(app.anti_features.as_ref().unwrap().contains("Ads"));
        assert!(app.requirements.as_ref().unwrap().contains("root"));
    }

    #[test]
    fn old_style_description_alone_is_wrapped() {
        let records = parse(
            r#"<repo><application id="org.x"><description>plain</description></application></repo>"#,
        );
        assert_eq!(apps(&records)[0].0.description.as_deref(), Some("<p>plain</p>"));
    }

    #[test]
    fn repo_attributes_collapse_whitespace() {
        let records = parse(
            "<repo name=\"Main\n   Repo\" description=\"Line one.\n\t\tLine two.\" maxage=\"14\" version=\"12\" pubkey=\"308201\"></repo>",
        );
        let [IndexRecord::Repository(meta)] = records.as_slice() else {
            panic!("expected only repository metadata");
        };
        assert_eq!(meta.name.as_deref(), Some("Main Repo"));
        assert_eq!(meta.description.as_deref(), Some("Line one. Line two."));
        assert_eq!(meta.max_age, 14);
        assert_eq!(meta.format_version, 12);
        assert_eq!(meta.signing_cert.as_deref(), Some("308201"));
    }

    #[test]
    fn repo_description_element_overrides_attribute() {
        let records = parse(
            r#"<repo description="attr"><description>  from
                element </description></repo>"#,
        );
        let [IndexRecord::Repository(meta)] = records.as_slice() else {
            panic!("expected only repository metadata");
        };
        assert_eq!(meta.description.as_deref(), Some("from element"));
    }

    #[test]
    fn duplicate_application_ids_are_both_emitted() {
        let records = parse(
            r#"<repo><application id="dup"><name>one</name></application><application id="dup"><name>two</name></application></repo>"#,
        );
        let apps = apps(&records);
        assert_eq!(apps.len(), 2);
        assert_eq!(apps[1].0.name.as_deref(), Some("two"));
    }

    #[test]
    fn cdata_text_is_accepted() {
        let records = parse(
            r#"<repo><application id="org.x"><desc><![CDATA[<b>bold</b>]]></desc></application></repo>"#,
        );
        assert_eq!(apps(&records)[0].0.description.as_deref(), Some("<b>bold</b>"));
    }

    #[test]
    fn mismatched_tags_fail() {
        let mut out = Vec::new();
        let err = parse_slice(
            b"<repo><application id=\"x\"></repo>",
            RepoId::new(1),
            &mut out,
        )
        .unwrap_err();
        assert!(err.to_string().starts_with("Document parse failed"));
    }

    #[test]
    fn truncated_document_fails() {
        let mut out = Vec::new();
        let err = parse_slice(
            b"<repo><application id=\"x\"><name>x</name>",
            RepoId::new(1),
            &mut out,
        )
        .unwrap_err();
        assert!(matches!(err, IndexError::Truncated(2) | IndexError::Xml(_)));
    }
}
