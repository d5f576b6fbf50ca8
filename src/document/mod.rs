//! Document engine: fill the template for a lead, then convert it to the
//! deliverable format.

pub mod convert;
pub mod poll;
pub mod template;

pub use convert::{
    ConversionJob, ConversionState, ConverterConfig, ConverterKind, DocumentConverter,
    SubprocessConverter,
};
pub use poll::{PollOutcome, PollSchedule};
pub use template::TemplateFields;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use crate::error::DocumentError;

/// Renders and converts lead documents.
pub struct DocumentEngine {
    template: PathBuf,
    output_dir: PathBuf,
    converter: Arc<dyn DocumentConverter>,
}

impl DocumentEngine {
    pub fn new(
        template: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        converter: Arc<dyn DocumentConverter>,
    ) -> Self {
        Self {
            template: template.into(),
            output_dir: output_dir.into(),
            converter,
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Fill the template for one lead. Returns the filled document's path.
    pub fn render(
        &self,
        message_id: &str,
        fields: &TemplateFields<'_>,
        blurbs: &[String],
    ) -> Result<PathBuf, DocumentError> {
        std::fs::create_dir_all(&self.output_dir)?;
        let output = self
            .output_dir
            .join(template::output_file_name(fields.company_name, message_id));

        template::render_template(&self.template, &output, fields, blurbs)?;
        info!(file = %output.display(), "Document rendered");
        Ok(output)
    }

    /// Convert a filled document. See [`DocumentConverter::convert`].
    pub async fn convert(&self, source: &Path) -> Result<PathBuf, DocumentError> {
        self.converter.convert(source).await
    }
}
