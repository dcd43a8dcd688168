//! The logical build/test request carried through the pipeline.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// One build-and-test unit: a build configuration plus the source and driver files it needs.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct TestElement {
    #[serde(default)]
    pub test_name: String,
    #[serde(default)]
    pub build_tool: String,
    /// File name of the build configuration, relative to the repository.
    pub build_config: String,
    #[serde(default)]
    pub test_driver: Option<String>,
    #[serde(default)]
    pub test_codes: Vec<String>,
}

impl TestElement {
    /// The stem of the build configuration's file name. Logs, artifacts, and notifications are
    /// all named after it.
    pub fn name(&self) -> &str {
        Path::new(&self.build_config)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or(&self.build_config)
    }

    /// The file a successful build is expected to leave behind.
    pub fn artifact_name(&self, extension: &str) -> String {
        if extension.is_empty() {
            self.name().to_owned()
        } else {
            format!("{}.{extension}", self.name())
        }
    }

    /// Every file the element needs from the repository, in request order: build configuration,
    /// then the test driver if there is one, then the test code.
    pub fn files(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.build_config.as_str())
            .chain(self.test_driver.as_deref())
            .chain(self.test_codes.iter().map(String::as_str))
    }
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct JobDescriptor {
    pub author: String,
    pub tests: Vec<TestElement>,
}

impl JobDescriptor {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// File names of every element, concatenated in element order.
    pub fn files(&self) -> Vec<String> {
        self.tests
            .iter()
            .flat_map(TestElement::files)
            .map(str::to_owned)
            .collect()
    }

    /// A descriptor with the same author and exactly one element.
    pub fn single(&self, element: &TestElement) -> Self {
        Self {
            author: self.author.clone(),
            tests: vec![element.clone()],
        }
    }
}
