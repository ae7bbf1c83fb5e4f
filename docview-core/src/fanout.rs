//! Pure helpers behind the read-only fetches `load` fans out.

use url::Url;

use crate::engine::DocumentInfo;

const KNOWN_VERSIONS: [&str; 14] = [
    "1.0", "1.1", "1.2", "1.3", "1.4", "1.5", "1.6", "1.7", "1.8", "1.9", "2.0", "2.1", "2.2",
    "2.3",
];

const KNOWN_GENERATORS: [&str; 24] = [
    "acrobat distiller",
    "acrobat pdfwriter",
    "adobe livecycle",
    "adobe pdf library",
    "adobe photoshop",
    "ghostscript",
    "tcpdf",
    "cairo",
    "dvipdfm",
    "dvips",
    "pdftex",
    "pdfkit",
    "itext",
    "prince",
    "quarkxpress",
    "mac os x",
    "microsoft",
    "openoffice",
    "oracle",
    "luradocument",
    "pdf-xchange",
    "antenna house",
    "aspose.cells",
    "fpdf",
];

/// Whether `labels` carry information beyond plain 1-based numbering.
///
/// Labels are counted from the first page until one is neither its page
/// number nor empty; a run covering every page means the labels are noise.
pub fn page_labels_are_meaningful(labels: &[String], pages_count: usize) -> bool {
    if labels.is_empty() || labels.len() != pages_count {
        return false;
    }
    let mut standard = 0;
    let mut empty = 0;
    for (index, label) in labels.iter().enumerate() {
        if *label == (index + 1).to_string() {
            standard += 1;
        } else if label.is_empty() {
            empty += 1;
        } else {
            break;
        }
    }
    standard < labels.len() && empty < labels.len()
}

fn is_usable_metadata_title(title: &str) -> bool {
    !title.is_empty()
        && title != "Untitled"
        && !title.chars().any(|c| ('\u{FFF0}'..='\u{FFFF}').contains(&c))
}

/// Window title for a loaded document, or `None` to keep the current one.
pub fn resolve_title(
    info_title: Option<&str>,
    metadata_title: Option<&str>,
    content_disposition_filename: Option<&str>,
    current_title: &str,
) -> Option<String> {
    let title = metadata_title
        .filter(|title| is_usable_metadata_title(title))
        .or(info_title)
        .filter(|title| !title.is_empty());
    match (title, content_disposition_filename) {
        (Some(title), Some(filename)) => Some(format!("{title} - {filename}")),
        (Some(title), None) => Some(format!("{title} - {current_title}")),
        (None, Some(filename)) => Some(filename.to_owned()),
        (None, None) => None,
    }
}

pub fn version_id(pdf_format_version: Option<&str>) -> String {
    match pdf_format_version {
        Some(version) if KNOWN_VERSIONS.contains(&version) => version.to_owned(),
        _ => "other".to_owned(),
    }
}

pub fn generator_id(producer: Option<&str>) -> String {
    let producer = producer.unwrap_or_default().to_lowercase();
    KNOWN_GENERATORS
        .iter()
        .find(|generator| producer.contains(*generator))
        .map(|generator| generator.replace([' ', '.', '-'], "_"))
        .unwrap_or_else(|| "other".to_owned())
}

pub fn form_type(info: &DocumentInfo) -> &'static str {
    if info.is_xfa_present {
        "xfa"
    } else if info.is_acro_form_present {
        "acroform"
    } else {
        "noform"
    }
}

/// Url without its fragment.
pub fn base_url(url: &str) -> &str {
    url.split('#').next().unwrap_or(url)
}

/// File name of the document a URL or path points at, if it names a PDF.
pub fn file_name_from_url(url: &str) -> Option<String> {
    let is_pdf = |name: &str| name.to_ascii_lowercase().ends_with(".pdf");

    let Ok(parsed) = Url::parse(url) else {
        let path = url.split(['?', '#']).next().unwrap_or(url);
        return path
            .rsplit(['/', '\\'])
            .next()
            .filter(|name| is_pdf(name))
            .map(str::to_owned);
    };

    if parsed.scheme() == "file" {
        if let Some(name) = parsed
            .to_file_path()
            .ok()
            .and_then(|path| path.file_name().map(|n| n.to_string_lossy().into_owned()))
        {
            if is_pdf(&name) {
                return Some(name);
            }
        }
    }
    if let Some(segment) = parsed
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
    {
        if is_pdf(segment) {
            return Some(segment.to_owned());
        }
    }
    parsed
        .query_pairs()
        .map(|(_, value)| value.into_owned())
        .filter(|value| is_pdf(value))
        .last()
        .map(|value| value.rsplit('/').next().unwrap_or(&value).to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| (*v).to_owned()).collect()
    }

    #[test]
    fn standard_or_empty_labels_are_ignored() {
        assert!(!page_labels_are_meaningful(&labels(&["1", "2", "3"]), 3));
        assert!(!page_labels_are_meaningful(&labels(&["", "", ""]), 3));
        assert!(!page_labels_are_meaningful(&labels(&["i", "ii"]), 3));
        assert!(page_labels_are_meaningful(&labels(&["i", "ii", "1"]), 3));
        assert!(page_labels_are_meaningful(&labels(&["1", "2", "A-1"]), 3));
    }

    #[test]
    fn metadata_title_wins_unless_placeholder() {
        assert_eq!(
            resolve_title(Some("Info"), Some("Xmp"), None, "a.pdf").as_deref(),
            Some("Xmp - a.pdf")
        );
        assert_eq!(
            resolve_title(Some("Info"), Some("Untitled"), Some("b.pdf"), "a.pdf").as_deref(),
            Some("Info - b.pdf")
        );
        assert_eq!(
            resolve_title(Some("Info"), Some("bad\u{FFFD}"), None, "a.pdf").as_deref(),
            Some("Info - a.pdf")
        );
        assert_eq!(
            resolve_title(None, None, Some("b.pdf"), "a.pdf").as_deref(),
            Some("b.pdf")
        );
        assert_eq!(resolve_title(Some(""), None, None, "a.pdf"), None);
    }

    #[test]
    fn telemetry_ids_fall_back_to_other() {
        assert_eq!(version_id(Some("1.7")), "1.7");
        assert_eq!(version_id(Some("9.9")), "other");
        assert_eq!(generator_id(Some("Mac OS X 10.15 Quartz PDFContext")), "mac_os_x");
        assert_eq!(generator_id(Some("Aspose.Cells for .NET")), "aspose_cells");
        assert_eq!(generator_id(None), "other");

        let info = DocumentInfo {
            is_acro_form_present: true,
            is_xfa_present: true,
            ..DocumentInfo::default()
        };
        assert_eq!(form_type(&info), "xfa");
        assert_eq!(form_type(&DocumentInfo::default()), "noform");
    }

    #[test]
    fn file_names_are_extracted_from_urls_and_paths() {
        assert_eq!(
            file_name_from_url("https://example.com/docs/report.pdf#page=2").as_deref(),
            Some("report.pdf")
        );
        assert_eq!(
            file_name_from_url("https://example.com/get?file=/files/a%20b.pdf").as_deref(),
            Some("a b.pdf")
        );
        assert_eq!(
            file_name_from_url("file:///tmp/my%20notes.pdf").as_deref(),
            Some("my notes.pdf")
        );
        assert_eq!(file_name_from_url("/tmp/local.PDF").as_deref(), Some("local.PDF"));
        assert_eq!(file_name_from_url("https://example.com/"), None);
        assert_eq!(base_url("a.pdf#page=3"), "a.pdf");
    }
}
