// ==========================================
// POS 导入核心 - 源文件句柄
// ==========================================
// 职责: 上传文件的元数据（原始文件名 / MIME / 大小 / 路径）与内容摘要
// 说明: 文件如何到达（HTTP / 队列 / CLI）由调用方负责
// ==========================================

use crate::importer::error::{ImportError, ImportResult};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    pub original_name: String,
    pub mime_type: String,
    pub size: u64,
}

impl SourceFile {
    /// 从本地路径构造，MIME 由扩展名推断
    pub fn from_path<P: AsRef<Path>>(path: P) -> ImportResult<Self> {
        Self::with_metadata(path, None, None)
    }

    /// 调用方可覆盖原始文件名与声明的 MIME
    pub fn with_metadata<P: AsRef<Path>>(
        path: P,
        original_name: Option<String>,
        declared_mime: Option<String>,
    ) -> ImportResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ImportError::FileNotFound(path.display().to_string()));
        }
        let size = std::fs::metadata(path)?.len();
        let original_name = original_name.unwrap_or_else(|| {
            path.file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| path.display().to_string())
        });
        let mime_type = declared_mime
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| guess_mime(&original_name));

        Ok(Self {
            path: path.to_path_buf(),
            original_name,
            mime_type,
            size,
        })
    }

    /// 小写扩展名（优先原始文件名）
    pub fn extension(&self) -> String {
        extension_of(&self.original_name)
            .or_else(|| extension_of(&self.path.to_string_lossy()))
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// 读取前 max_bytes 字节
    pub fn read_head(&self, max_bytes: usize) -> ImportResult<Vec<u8>> {
        let file = File::open(&self.path)?;
        let mut buf = Vec::with_capacity(max_bytes.min(self.size as usize));
        file.take(max_bytes as u64).read_to_end(&mut buf)?;
        Ok(buf)
    }

    pub fn read_all(&self) -> ImportResult<Vec<u8>> {
        Ok(std::fs::read(&self.path)?)
    }

    /// 内容摘要（SHA-256 hex），用于识别重复上传
    pub fn content_hash(&self) -> ImportResult<String> {
        let mut file = File::open(&self.path)?;
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hex::encode(hasher.finalize()))
    }
}

fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
}

/// 按文件名推断 MIME
pub fn guess_mime(file_name: &str) -> String {
    let ext = extension_of(file_name).unwrap_or_default();
    mime_guess::from_ext(&ext)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::Builder;

    #[test]
    fn test_source_file_metadata() {
        let mut tmp = Builder::new().suffix(".CSV").tempfile().unwrap();
        write!(tmp, "id,name\n1,Burger\n").unwrap();

        let file = SourceFile::from_path(tmp.path()).unwrap();
        assert_eq!(file.extension(), "csv");
        assert_eq!(file.mime_type, "text/csv");
        assert_eq!(file.size, 16);
        assert_eq!(file.read_head(2).unwrap(), b"id");
    }

    #[test]
    fn test_content_hash_is_stable() {
        let mut a = Builder::new().suffix(".csv").tempfile().unwrap();
        let mut b = Builder::new().suffix(".csv").tempfile().unwrap();
        write!(a, "same").unwrap();
        write!(b, "same").unwrap();

        let ha = SourceFile::from_path(a.path()).unwrap().content_hash().unwrap();
        let hb = SourceFile::from_path(b.path()).unwrap().content_hash().unwrap();
        assert_eq!(ha, hb);
        assert_eq!(ha.len(), 64);
    }

    #[test]
    fn test_missing_file() {
        let err = SourceFile::from_path("/nonexistent/menu.csv").unwrap_err();
        assert!(matches!(err, ImportError::FileNotFound(_)));
    }
}
