use crate::error::SourceError;
use crate::models::{DocumentType, FileEntry};
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

const YEAR_PREFIX: &str = "FY ";

/// Browses documents laid out as `<root>/<FY xx>/<patient>/<files>`.
pub trait DocumentSource: Send + Sync {
    /// Fiscal-year folders, most recent first.
    fn list_years(&self) -> Result<Vec<String>, SourceError>;

    /// Patient folders of a year, sorted case-insensitively.
    fn list_patients(&self, year: &str) -> Result<Vec<String>, SourceError>;

    /// Supported documents of one patient, sorted by lower-cased name.
    fn patient_files(&self, year: &str, patient: &str) -> Result<Vec<FileEntry>, SourceError>;

    fn read(&self, entry: &FileEntry) -> Result<Vec<u8>, SourceError>;

    fn file_count(&self, year: &str, patient: &str) -> Result<usize, SourceError> {
        Ok(self.patient_files(year, patient)?.len())
    }
}

/// A [`DocumentSource`] over a local directory: the mock data tree or a
/// locally mounted share.
#[derive(Debug, Clone)]
pub struct LocalDocumentSource {
    root: PathBuf,
}

impl LocalDocumentSource {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, SourceError> {
        let root = root.into();
        if !root.is_dir() {
            return Err(SourceError::MissingRoot(root));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn child(&self, parts: &[&str]) -> Result<PathBuf, SourceError> {
        let mut path = self.root.clone();
        for part in parts {
            if part.trim().is_empty() {
                return Err(SourceError::InvalidArgument("folder name cannot be empty"));
            }
            let mut components = Path::new(part).components();
            match (components.next(), components.next()) {
                (Some(Component::Normal(_)), None) => path.push(part),
                _ => {
                    return Err(SourceError::InvalidArgument(
                        "folder name must be a single path segment",
                    ))
                }
            }
        }
        Ok(path)
    }
}

impl DocumentSource for LocalDocumentSource {
    fn list_years(&self) -> Result<Vec<String>, SourceError> {
        let mut years = subdirectories(&self.root)?
            .into_iter()
            .filter(|name| name.to_uppercase().starts_with(YEAR_PREFIX))
            .collect::<Vec<_>>();
        years.sort_unstable_by(|a, b| b.cmp(a));
        info!(years = years.len(), "listed fiscal years");
        Ok(years)
    }

    fn list_patients(&self, year: &str) -> Result<Vec<String>, SourceError> {
        let year_path = self.child(&[year])?;
        if !year_path.is_dir() {
            return Err(SourceError::NotFound("year"));
        }
        let mut patients = subdirectories(&year_path)?;
        patients.sort_by_key(|name| name.to_lowercase());
        info!(patients = patients.len(), "listed patient folders");
        Ok(patients)
    }

    fn patient_files(&self, year: &str, patient: &str) -> Result<Vec<FileEntry>, SourceError> {
        let patient_path = self.child(&[year, patient])?;
        if !patient_path.is_dir() {
            return Err(SourceError::NotFound("patient"));
        }

        let mut files = Vec::new();
        for entry in fs::read_dir(&patient_path)? {
            let entry = entry?;
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            let path = entry.path();
            let kind = DocumentType::from_path(&path);
            if !kind.is_supported() {
                continue;
            }
            files.push(FileEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                path,
                size: metadata.len(),
                extension: kind.extension().to_string(),
            });
        }

        files.sort_by_key(|file| file.name.to_lowercase());
        debug!(files = files.len(), "listed patient documents");
        Ok(files)
    }

    fn read(&self, entry: &FileEntry) -> Result<Vec<u8>, SourceError> {
        Ok(fs::read(&entry.path)?)
    }
}

fn subdirectories(path: &Path) -> Result<Vec<String>, SourceError> {
    let mut names = Vec::new();
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    Ok(names)
}

/// Every supported document below `folder`, sorted by path.
pub fn discover_documents(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        if DocumentType::from_path(entry.path()).is_supported() {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn mock_tree(root: &Path) -> std::io::Result<()> {
        for year in ["FY 24", "FY 25", "archive"] {
            fs::create_dir_all(root.join(year))?;
        }
        for patient in ["beta_patient", "Alpha_Patient", "charlie_patient"] {
            fs::create_dir_all(root.join("FY 25").join(patient))?;
        }
        let alpha = root.join("FY 25").join("Alpha_Patient");
        fs::write(alpha.join("progress_note.TXT"), b"stable")?;
        fs::write(alpha.join("Admission.pdf"), b"%PDF-1.4")?;
        fs::write(alpha.join("scan.png"), b"png")?;
        fs::create_dir_all(alpha.join("nested.txt"))?;
        Ok(())
    }

    #[test]
    fn missing_root_is_reported() {
        let error = LocalDocumentSource::new("/definitely/not/here").unwrap_err();
        assert!(matches!(error, SourceError::MissingRoot(_)));
    }

    #[test]
    fn years_are_filtered_and_sorted_descending() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        mock_tree(dir.path())?;
        let source = LocalDocumentSource::new(dir.path())?;
        assert_eq!(source.list_years()?, vec!["FY 25", "FY 24"]);
        Ok(())
    }

    #[test]
    fn patients_sort_case_insensitively() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        mock_tree(dir.path())?;
        let source = LocalDocumentSource::new(dir.path())?;
        assert_eq!(
            source.list_patients("FY 25")?,
            vec!["Alpha_Patient", "beta_patient", "charlie_patient"]
        );
        assert!(matches!(
            source.list_patients("FY 19"),
            Err(SourceError::NotFound("year"))
        ));
        Ok(())
    }

    #[test]
    fn patient_files_keep_supported_documents() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        mock_tree(dir.path())?;
        let source = LocalDocumentSource::new(dir.path())?;

        let files = source.patient_files("FY 25", "Alpha_Patient")?;
        let names: Vec<&str> = files.iter().map(|file| file.name.as_str()).collect();
        assert_eq!(names, vec!["Admission.pdf", "progress_note.TXT"]);
        assert_eq!(files[1].extension, ".txt");
        assert_eq!(files[1].size, 6);
        assert_eq!(source.read(&files[1])?, b"stable");
        assert_eq!(source.file_count("FY 25", "Alpha_Patient")?, 2);
        Ok(())
    }

    #[test]
    fn traversal_outside_the_root_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        mock_tree(dir.path())?;
        let source = LocalDocumentSource::new(dir.path())?;
        assert!(matches!(
            source.list_patients(".."),
            Err(SourceError::InvalidArgument(_))
        ));
        assert!(matches!(
            source.patient_files("FY 25", "../FY 24"),
            Err(SourceError::InvalidArgument(_))
        ));
        assert!(matches!(
            source.patient_files("FY 25", " "),
            Err(SourceError::InvalidArgument(_))
        ));
        Ok(())
    }

    #[test]
    fn discovery_is_recursive() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        mock_tree(dir.path())?;
        fs::write(dir.path().join("loose.rtf"), b"{\\rtf1 x}")?;

        let files = discover_documents(dir.path());
        assert_eq!(files.len(), 3);
        assert!(files.windows(2).all(|pair| pair[0] <= pair[1]));
        Ok(())
    }
}
