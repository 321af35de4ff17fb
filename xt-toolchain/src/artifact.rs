//! Artifact name patterns.

use std::path::Path;

use xt_vars::{Template, Variables};

use crate::defs::ArtifactNamePatternSpec;
use crate::Error;

/// Category of build output an artifact name pattern applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ArtifactCategory {
    StaticLibrary,
    DynamicLibrary,
    InterfaceLibrary,
    Executable,
    ObjectFile,
    PicObjectFile,
    GeneratedAssembly,
    PreprocessedSource,
    IncludedFileList,
}

impl ArtifactCategory {
    /// Every known category.
    pub const ALL: &'static [ArtifactCategory] = &[
        ArtifactCategory::StaticLibrary,
        ArtifactCategory::DynamicLibrary,
        ArtifactCategory::InterfaceLibrary,
        ArtifactCategory::Executable,
        ArtifactCategory::ObjectFile,
        ArtifactCategory::PicObjectFile,
        ArtifactCategory::GeneratedAssembly,
        ArtifactCategory::PreprocessedSource,
        ArtifactCategory::IncludedFileList,
    ];

    /// The category name used in toolchain descriptions.
    pub fn category_name(self) -> &'static str {
        match self {
            ArtifactCategory::StaticLibrary => "static_library",
            ArtifactCategory::DynamicLibrary => "dynamic_library",
            ArtifactCategory::InterfaceLibrary => "interface_library",
            ArtifactCategory::Executable => "executable",
            ArtifactCategory::ObjectFile => "object_file",
            ArtifactCategory::PicObjectFile => "pic_object_file",
            ArtifactCategory::GeneratedAssembly => "generated_assembly",
            ArtifactCategory::PreprocessedSource => "preprocessed_source",
            ArtifactCategory::IncludedFileList => "included_file_list",
        }
    }

    fn from_category_name(name: &str) -> Option<ArtifactCategory> {
        Self::ALL
            .iter()
            .copied()
            .find(|category| category.category_name() == name)
    }
}

/// How artifacts of one category are named.
#[derive(Debug, Clone)]
pub(crate) struct ArtifactNamePattern {
    pub(crate) category: ArtifactCategory,
    template: Template,
}

impl ArtifactNamePattern {
    pub(crate) fn new(spec: ArtifactNamePatternSpec) -> Result<ArtifactNamePattern, Error> {
        let Some(category) = ArtifactCategory::from_category_name(&spec.category_name) else {
            return Err(Error::InvalidConfiguration(format!(
                "artifact category '{}' not recognized",
                spec.category_name
            )));
        };
        Ok(ArtifactNamePattern {
            category,
            template: Template::parse(&spec.pattern)?,
        })
    }

    /// Expand the pattern for `output_name`.
    ///
    /// The pattern scope binds `output_name`, `base_name` (the final path
    /// component), and `output_directory` (the parent path). A leading `/`
    /// in the result is stripped.
    pub(crate) fn artifact_name(&self, output_name: &str) -> Result<String, Error> {
        let output = Path::new(output_name);
        let base_name = output
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let output_directory = output
            .parent()
            .map(|dir| dir.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut vars = Variables::new();
        vars.set("output_name", output_name)
            .set("base_name", base_name)
            .set("output_directory", output_directory);
        let result = self.template.expand(&vars.scope())?;
        match result.strip_prefix('/') {
            Some(stripped) => Ok(stripped.to_string()),
            None => Ok(result),
        }
    }
}
