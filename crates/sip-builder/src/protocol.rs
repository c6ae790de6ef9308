//! The `.protocol` manifest written alongside each package's `metadata.xml`.

const PROTOCOL_NS: &str = "http://www.tessella.com/xipcreateprotocol/v1";

/// Summary written to `<sipRef>.protocol` when a package is serialised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Protocol {
    pub date_created: String,
    /// Sum of the uncompressed sizes of every entry under `content/`.
    pub size: u64,
    /// Count of unique directory and file entries under `content/`.
    pub files: u64,
    pub submission_name: String,
    pub catalogue_name: String,
    /// This package's own `sipRef`.
    pub local_aip: String,
    /// The destination folder's ref in the target repository.
    pub global_aip: String,
    pub created_by: String,
}

impl Protocol {
    pub fn to_xml(&self) -> String {
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n\
<protocol xmlns=\"{ns}\">\n  \
<dateCreated>{date}</dateCreated>\n  \
<size>{size}</size>\n  \
<files>{files}</files>\n  \
<submissionName>{submission}</submissionName>\n  \
<catalogueName>{catalogue}</catalogueName>\n  \
<localAIP>{local}</localAIP>\n  \
<globalAIP>{global}</globalAIP>\n  \
<createdBy>{by}</createdBy>\n\
</protocol>\n",
            ns = PROTOCOL_NS,
            date = xml_escape(&self.date_created),
            size = self.size,
            files = self.files,
            submission = xml_escape(&self.submission_name),
            catalogue = xml_escape(&self.catalogue_name),
            local = xml_escape(&self.local_aip),
            global = xml_escape(&self.global_aip),
            by = xml_escape(&self.created_by),
        )
    }
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
