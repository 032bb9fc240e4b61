//! Installed model discovery.
//!
//! A model is either a directory under the models path or a `.param` /
//! `.bin` file pair sharing a base name (the ncnn layout).

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;

/// Scale factors every model accepts unless listed otherwise.
const DEFAULT_SCALES: &[u32] = &[2, 3, 4];

/// Capabilities of an installed model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelInfo {
    pub name: String,
    pub description: String,
    pub supported_scales: Vec<u32>,
}

/// Description and scale set for well-known model names.
fn describe(name: &str) -> (&'static str, &'static [u32]) {
    match name {
        "realesrgan-x4plus" => ("General purpose 4x upscaling for photos", DEFAULT_SCALES),
        "realesrgan-x4plus-anime" => ("Optimized for anime and illustrations", &[4]),
        "realesr-animevideov3" => ("Anime/video optimized with 2x/3x/4x support", DEFAULT_SCALES),
        _ => ("Custom model", DEFAULT_SCALES),
    }
}

/// A model name may not escape the models directory.
pub fn is_safe_model_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.contains('\0')
}

/// Whether `name` resolves to an installed model asset.
pub async fn model_exists(models_dir: &Path, name: &str) -> bool {
    if !is_safe_model_name(name) {
        return false;
    }

    let base = models_dir.join(name);
    if tokio::fs::metadata(&base)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
    {
        return true;
    }

    let param = models_dir.join(format!("{name}.param"));
    let bin = models_dir.join(format!("{name}.bin"));
    tokio::fs::try_exists(&param).await.unwrap_or(false)
        && tokio::fs::try_exists(&bin).await.unwrap_or(false)
}

/// Scan `models_dir` and list installed models, sorted by name.
pub async fn list_available_models(models_dir: &Path) -> std::io::Result<Vec<ModelInfo>> {
    let mut entries = tokio::fs::read_dir(models_dir).await?;
    let mut models = BTreeMap::new();

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);

        let model_name = if is_dir {
            entry.file_name().to_string_lossy().into_owned()
        } else {
            match path.extension().and_then(|e| e.to_str()) {
                Some("param" | "bin") => match path.file_stem() {
                    Some(stem) => stem.to_string_lossy().into_owned(),
                    None => continue,
                },
                _ => continue,
            }
        };

        models.entry(model_name.clone()).or_insert_with(|| {
            let (description, scales) = describe(&model_name);
            ModelInfo {
                name: model_name,
                description: description.to_string(),
                supported_scales: scales.to_vec(),
            }
        });
    }

    Ok(models.into_values().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        std::fs::write(path, b"").expect("touch");
    }

    #[tokio::test]
    async fn lists_pairs_and_directories_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        touch(&dir.path().join("realesrgan-x4plus.param"));
        touch(&dir.path().join("realesrgan-x4plus.bin"));
        touch(&dir.path().join("realesrgan-x4plus-anime.param"));
        touch(&dir.path().join("realesrgan-x4plus-anime.bin"));
        std::fs::create_dir(dir.path().join("my-model")).expect("mkdir");
        touch(&dir.path().join("README.md"));

        let models = list_available_models(dir.path()).await.expect("list");
        let names: Vec<_> = models.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, ["my-model", "realesrgan-x4plus", "realesrgan-x4plus-anime"]);

        assert_eq!(models[0].description, "Custom model");
        assert_eq!(models[0].supported_scales, vec![2, 3, 4]);
        assert_eq!(models[2].supported_scales, vec![4]);
    }

    #[tokio::test]
    async fn missing_directory_is_error() {
        assert!(list_available_models(Path::new("/nonexistent/models")).await.is_err());
    }

    #[tokio::test]
    async fn model_exists_requires_both_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        touch(&dir.path().join("half.param"));
        assert!(!model_exists(dir.path(), "half").await);

        touch(&dir.path().join("half.bin"));
        assert!(model_exists(dir.path(), "half").await);
    }

    #[tokio::test]
    async fn model_exists_accepts_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir(dir.path().join("bundle")).expect("mkdir");
        assert!(model_exists(dir.path(), "bundle").await);
    }

    #[tokio::test]
    async fn traversal_names_never_resolve() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir(dir.path().join("inner")).expect("mkdir");
        let models = dir.path().join("inner");
        assert!(!model_exists(&models, "..").await);
        assert!(!model_exists(&models, "../inner").await);
    }

    #[test]
    fn safe_names() {
        assert!(is_safe_model_name("realesrgan-x4plus"));
        assert!(!is_safe_model_name(""));
        assert!(!is_safe_model_name("a/b"));
        assert!(!is_safe_model_name("a\\b"));
    }
}
