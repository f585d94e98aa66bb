use std::{
    fs,
    io::{self, Read},
    path::Path,
};

use tracing::debug;

use crate::error::ConfigError;

/// Read a payload or certificate file into memory. A path of `-` reads stdin
/// until EOF.
pub fn load_file(path: &Path) -> Result<Vec<u8>, ConfigError> {
    let with_path = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };

    let data = if path.as_os_str() == "-" {
        let mut buf = Vec::new();
        io::stdin().lock().read_to_end(&mut buf).map_err(with_path)?;
        buf
    } else {
        fs::read(path).map_err(with_path)?
    };
    debug!(path = %path.display(), len = data.len(), "loaded file");
    Ok(data)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn loads_file_contents() {
        let path = std::env::temp_dir().join(format!("mqtt-bench-load-{}", std::process::id()));
        fs::write(&path, b"hello broker").unwrap();

        let data = load_file(&path).unwrap();
        assert_eq!(data, b"hello broker");

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_file(&PathBuf::from("/definitely/not/here.pem")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
