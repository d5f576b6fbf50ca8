//! `.docx` template filling.
//!
//! A `.docx` is a zip of XML parts. Placeholders are replaced inside `<w:t>`
//! text nodes of the body, header and footer parts; every other archive entry
//! is copied through untouched.

use std::fs::File;
use std::io::{Cursor, Read, Write};
use std::path::Path;
use std::sync::LazyLock;

use quick_xml::events::{BytesText, Event};
use quick_xml::{Reader, Writer};
use regex::Regex;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::DocumentError;
use crate::pipeline::types::BLURB_COUNT;

pub const NAME_PLACEHOLDER: &str = "(Name)";
pub const COMPANY_PLACEHOLDER: &str = "(company name)";
pub const DESCRIPTION_PLACEHOLDER: &str = "(what your company deals with)";
pub const BLURB_PLACEHOLDER: &str = "Input Blurbs here";

const BODY_PART: &str = "word/document.xml";

static UNSAFE_FILENAME_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\w\s-]").unwrap());

/// Values substituted for the single-occurrence placeholders.
#[derive(Debug, Clone, Copy)]
pub struct TemplateFields<'a> {
    pub name: &'a str,
    pub company_name: &'a str,
    pub company_description: &'a str,
}

/// `<Company_Name>_<id prefix>.docx`, stable for a given lead.
pub fn output_file_name(company_name: &str, message_id: &str) -> String {
    let safe = UNSAFE_FILENAME_RE.replace_all(company_name, "");
    let safe = safe.split_whitespace().collect::<Vec<_>>().join("_");
    let safe = if safe.is_empty() { "Company".to_string() } else { safe };

    let prefix: String = message_id
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(8)
        .collect();
    format!("{safe}_{prefix}.docx")
}

fn is_text_part(name: &str) -> bool {
    name == BODY_PART
        || (name.starts_with("word/header") || name.starts_with("word/footer"))
            && name.ends_with(".xml")
}

fn xml_err(e: impl std::fmt::Display) -> DocumentError {
    DocumentError::Xml(e.to_string())
}

/// Replace placeholders inside the `<w:t>` nodes of one XML part.
///
/// Each blurb placeholder occurrence consumes the next item of `blurbs`;
/// once `blurbs` runs dry the remaining occurrences are left as they are.
pub fn fill_xml<'b, I>(
    xml: &str,
    fields: &TemplateFields<'_>,
    blurbs: &mut I,
) -> Result<String, DocumentError>
where
    I: Iterator<Item = &'b str>,
{
    let mut reader = Reader::from_str(xml);
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    let mut in_text = false;

    loop {
        let event = reader.read_event().map_err(xml_err)?;
        match event {
            Event::Eof => break,
            Event::Start(ref e) if e.local_name().as_ref() == b"t" => {
                in_text = true;
                writer.write_event(event).map_err(xml_err)?;
            }
            Event::End(ref e) if e.local_name().as_ref() == b"t" => {
                in_text = false;
                writer.write_event(event).map_err(xml_err)?;
            }
            Event::Text(ref e) if in_text => {
                let original = e.unescape().map_err(xml_err)?;
                let mut text = original
                    .replace(NAME_PLACEHOLDER, fields.name)
                    .replace(COMPANY_PLACEHOLDER, fields.company_name)
                    .replace(DESCRIPTION_PLACEHOLDER, fields.company_description);
                while text.contains(BLURB_PLACEHOLDER) {
                    let Some(blurb) = blurbs.next() else { break };
                    text = text.replacen(BLURB_PLACEHOLDER, blurb, 1);
                }

                if text == original {
                    writer.write_event(event).map_err(xml_err)?;
                } else {
                    writer
                        .write_event(Event::Text(BytesText::new(&text)))
                        .map_err(xml_err)?;
                }
            }
            other => writer.write_event(other).map_err(xml_err)?,
        }
    }

    String::from_utf8(writer.into_inner().into_inner()).map_err(xml_err)
}

/// Fill `template` and write the result to `output`.
///
/// The archive is assembled next to `output` and renamed into place, so a
/// failure never leaves a partial document behind.
pub fn render_template(
    template: &Path,
    output: &Path,
    fields: &TemplateFields<'_>,
    blurbs: &[String],
) -> Result<(), DocumentError> {
    if !template.is_file() {
        return Err(DocumentError::TemplateMissing(template.to_path_buf()));
    }

    let mut archive = ZipArchive::new(File::open(template)?)?;

    // The body is filled first so blurbs land in body order.
    let mut parts: Vec<String> = archive
        .file_names()
        .filter(|n| is_text_part(n))
        .map(str::to_string)
        .collect();
    parts.sort_by_key(|n| n != BODY_PART);

    let mut blurb_iter = blurbs.iter().take(BLURB_COUNT).map(String::as_str);
    let mut filled = Vec::with_capacity(parts.len());
    for name in &parts {
        let mut xml = String::new();
        archive.by_name(name)?.read_to_string(&mut xml)?;
        let result = if name == BODY_PART {
            fill_xml(&xml, fields, &mut blurb_iter)?
        } else {
            fill_xml(&xml, fields, &mut std::iter::empty())?
        };
        filled.push((name.clone(), result));
    }

    let staging = output.with_extension("docx.tmp");
    match write_archive(&mut archive, &filled, &staging) {
        Ok(()) => {
            std::fs::rename(&staging, output)?;
            Ok(())
        }
        Err(e) => {
            let _ = std::fs::remove_file(&staging);
            Err(e)
        }
    }
}

/// Copy `archive` to `path`, swapping in the `filled` parts.
fn write_archive(
    archive: &mut ZipArchive<File>,
    filled: &[(String, String)],
    path: &Path,
) -> Result<(), DocumentError> {
    let mut out = ZipWriter::new(File::create(path)?);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for i in 0..archive.len() {
        let entry = archive.by_index_raw(i)?;
        let name = entry.name().to_string();
        match filled.iter().find(|(n, _)| *n == name) {
            Some((_, xml)) => {
                drop(entry);
                out.start_file(name, options)?;
                out.write_all(xml.as_bytes())?;
            }
            None => out.raw_copy_file(entry)?,
        }
    }
    out.finish()?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    const W_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";

    /// Minimal `.docx` whose body has one paragraph per entry of `paragraphs`.
    pub(crate) fn write_test_template(path: &Path, paragraphs: &[&str]) {
        let body: String = paragraphs
            .iter()
            .map(|p| format!("<w:p><w:r><w:t xml:space=\"preserve\">{p}</w:t></w:r></w:p>"))
            .collect();
        let document = format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\
             <w:document xmlns:w=\"{W_NS}\"><w:body>{body}</w:body></w:document>"
        );

        let mut zip = ZipWriter::new(File::create(path).unwrap());
        let options = SimpleFileOptions::default();
        zip.start_file("[Content_Types].xml", options).unwrap();
        zip.write_all(b"<?xml version=\"1.0\"?><Types/>").unwrap();
        zip.start_file(BODY_PART, options).unwrap();
        zip.write_all(document.as_bytes()).unwrap();
        zip.finish().unwrap();
    }

    pub(crate) fn read_body(path: &Path) -> String {
        let mut archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
        let mut xml = String::new();
        archive
            .by_name(BODY_PART)
            .unwrap()
            .read_to_string(&mut xml)
            .unwrap();
        xml
    }

    fn fields() -> TemplateFields<'static> {
        TemplateFields {
            name: "Jane Doe",
            company_name: "Acme & Sons",
            company_description: "providing widgets to manufacturers.",
        }
    }

    #[test]
    fn file_name_is_sanitized_and_prefixed() {
        assert_eq!(
            output_file_name("Acme Widgets, Inc.", "abc-123@mail.acme.com"),
            "Acme_Widgets_Inc_abc123ma.docx"
        );
        assert_eq!(output_file_name("!!!", "xyz"), "Company_xyz.docx");
    }

    #[test]
    fn single_placeholders_replaced_everywhere() {
        let xml = format!(
            "<w:document xmlns:w=\"{W_NS}\"><w:body>\
             <w:p><w:r><w:t>Dear (Name),</w:t></w:r></w:p>\
             <w:p><w:r><w:t>(company name) is (what your company deals with)</w:t></w:r></w:p>\
             <w:p><w:r><w:t>(Name) again</w:t></w:r></w:p>\
             </w:body></w:document>"
        );
        let out = fill_xml(&xml, &fields(), &mut std::iter::empty()).unwrap();
        assert!(out.contains("Dear Jane Doe,"));
        assert!(out.contains("Acme &amp; Sons is providing widgets to manufacturers."));
        assert!(out.contains("Jane Doe again"));
        assert!(!out.contains("(Name)"));
    }

    #[test]
    fn blurbs_consumed_in_document_order() {
        let xml = format!(
            "<w:document xmlns:w=\"{W_NS}\"><w:body>{}</w:body></w:document>",
            "<w:p><w:r><w:t>Input Blurbs here</w:t></w:r></w:p>".repeat(7)
        );
        let blurbs = ["one", "two", "three", "four", "five"];
        let out = fill_xml(&xml, &fields(), &mut blurbs.into_iter()).unwrap();

        let positions: Vec<usize> = blurbs.iter().map(|b| out.find(b).unwrap()).collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(out.matches(BLURB_PLACEHOLDER).count(), 2);
    }

    #[test]
    fn text_outside_runs_is_untouched() {
        let xml = format!(
            "<w:document xmlns:w=\"{W_NS}\"><w:body><w:instrText>(Name)</w:instrText></w:body></w:document>"
        );
        let out = fill_xml(&xml, &fields(), &mut std::iter::empty()).unwrap();
        assert!(out.contains("<w:instrText>(Name)</w:instrText>"));
    }

    #[test]
    fn render_template_writes_filled_archive() {
        let tmp = tempfile::tempdir().unwrap();
        let template = tmp.path().join("template.docx");
        let output = tmp.path().join("out.docx");
        write_test_template(
            &template,
            &["Hello (Name)", "Input Blurbs here", "Input Blurbs here"],
        );

        let blurbs: Vec<String> = (1..=5).map(|i| format!("blurb {i}")).collect();
        render_template(&template, &output, &fields(), &blurbs).unwrap();

        let body = read_body(&output);
        assert!(body.contains("Hello Jane Doe"));
        assert!(body.contains("blurb 1"));
        assert!(body.contains("blurb 2"));
        assert!(!body.contains("blurb 3"));

        let mut archive = ZipArchive::new(File::open(&output).unwrap()).unwrap();
        assert!(archive.by_name("[Content_Types].xml").is_ok());
    }

    #[test]
    fn malformed_template_leaves_no_output() {
        let tmp = tempfile::tempdir().unwrap();
        let template = tmp.path().join("template.docx");
        let mut zip = ZipWriter::new(File::create(&template).unwrap());
        zip.start_file(BODY_PART, SimpleFileOptions::default()).unwrap();
        zip.write_all(b"<w:document><w:body><w:t>(Name)</w:p></w:document>")
            .unwrap();
        zip.finish().unwrap();

        let output = tmp.path().join("out.docx");
        let err = render_template(&template, &output, &fields(), &[]).unwrap_err();
        assert!(matches!(err, DocumentError::Xml(_)));

        let entries: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("template.docx")]);
    }

    #[test]
    fn missing_template_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let err = render_template(
            &tmp.path().join("nope.docx"),
            &tmp.path().join("out.docx"),
            &fields(),
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, DocumentError::TemplateMissing(_)));
    }
}
