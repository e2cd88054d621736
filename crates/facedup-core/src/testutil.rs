//! Scripted in-process `FaceService` for allocator and workflow tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::imaging::ImageLimits;
use crate::service::{FaceService, RemoteError, CODE_INVALID_OUTER_ID};
use crate::types::{FaceToken, FacesetDetail, VerificationMatch};

#[derive(Default)]
struct FakeState {
    facesets: HashMap<String, u32>,
    detect: Vec<FaceToken>,
    search: HashMap<String, Vec<VerificationMatch>>,
    search_failures: HashMap<String, RemoteError>,
    detect_failure: Option<RemoteError>,
    add_failure: Option<RemoteError>,
    detail_failure: Option<RemoteError>,
    detect_calls: usize,
    create_calls: Vec<String>,
    search_calls: Vec<String>,
    add_calls: Vec<(FaceToken, String)>,
}

/// Injected failures fire once, on the next matching call.
#[derive(Default)]
pub struct FakeFaceService {
    state: Mutex<FakeState>,
}

impl FakeFaceService {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn add_remote_faceset(&self, id: &str, count: u32) {
        self.with(|s| s.facesets.insert(id.to_string(), count));
    }

    pub fn remote_count(&self, id: &str) -> Option<u32> {
        self.with(|s| s.facesets.get(id).copied())
    }

    pub fn set_detect(&self, tokens: &[&str]) {
        self.with(|s| s.detect = tokens.iter().map(|t| FaceToken::from(*t)).collect());
    }

    pub fn set_search(&self, outer_id: &str, hits: &[(f64, &str)]) {
        let hits = hits
            .iter()
            .map(|(confidence, token)| VerificationMatch {
                confidence: *confidence,
                face_token: FaceToken::from(*token),
            })
            .collect();
        self.with(|s| s.search.insert(outer_id.to_string(), hits));
    }

    pub fn fail_search_for(&self, outer_id: &str, err: RemoteError) {
        self.with(|s| s.search_failures.insert(outer_id.to_string(), err));
    }

    pub fn fail_detect_with(&self, err: RemoteError) {
        self.with(|s| s.detect_failure = Some(err));
    }

    pub fn fail_add_with(&self, err: RemoteError) {
        self.with(|s| s.add_failure = Some(err));
    }

    pub fn fail_detail_with(&self, err: RemoteError) {
        self.with(|s| s.detail_failure = Some(err));
    }

    pub fn detect_calls(&self) -> usize {
        self.with(|s| s.detect_calls)
    }

    pub fn create_calls(&self) -> Vec<String> {
        self.with(|s| s.create_calls.clone())
    }

    pub fn search_calls(&self) -> Vec<String> {
        self.with(|s| s.search_calls.clone())
    }

    pub fn add_calls(&self) -> Vec<(FaceToken, String)> {
        self.with(|s| s.add_calls.clone())
    }
}

fn unknown_faceset(operation: &'static str) -> RemoteError {
    RemoteError::Service {
        operation,
        status: 400,
        code: Some(CODE_INVALID_OUTER_ID.to_string()),
        body: format!("{{\"error_message\":\"{CODE_INVALID_OUTER_ID}\"}}"),
    }
}

#[async_trait]
impl FaceService for FakeFaceService {
    async fn detect(&self, _image: Vec<u8>) -> Result<Vec<FaceToken>, RemoteError> {
        self.with(|s| {
            s.detect_calls += 1;
            match s.detect_failure.take() {
                Some(err) => Err(err),
                None => Ok(s.detect.clone()),
            }
        })
    }

    async fn search(
        &self,
        _face_token: &FaceToken,
        outer_id: &str,
        _top_n: u32,
    ) -> Result<Vec<VerificationMatch>, RemoteError> {
        self.with(|s| {
            s.search_calls.push(outer_id.to_string());
            if let Some(err) = s.search_failures.remove(outer_id) {
                return Err(err);
            }
            if !s.facesets.contains_key(outer_id) {
                return Err(unknown_faceset("search"));
            }
            Ok(s.search.get(outer_id).cloned().unwrap_or_default())
        })
    }

    async fn create_faceset(
        &self,
        _display_name: &str,
        outer_id: &str,
        _tags: &str,
    ) -> Result<(), RemoteError> {
        self.with(|s| {
            s.create_calls.push(outer_id.to_string());
            s.facesets.entry(outer_id.to_string()).or_insert(0);
        });
        Ok(())
    }

    async fn add_face(&self, face_token: &FaceToken, outer_id: &str) -> Result<u32, RemoteError> {
        self.with(|s| {
            s.add_calls.push((face_token.clone(), outer_id.to_string()));
            if let Some(err) = s.add_failure.take() {
                return Err(err);
            }
            match s.facesets.get_mut(outer_id) {
                Some(count) => {
                    *count += 1;
                    Ok(1)
                }
                None => Err(unknown_faceset("add_face")),
            }
        })
    }

    async fn faceset_detail(&self, outer_id: &str) -> Result<Option<FacesetDetail>, RemoteError> {
        self.with(|s| {
            if let Some(err) = s.detail_failure.take() {
                return Err(err);
            }
            Ok(s.facesets.get(outer_id).map(|&face_count| FacesetDetail {
                face_count,
                faceset_token: None,
            }))
        })
    }
}

/// A 64x64 PNG that passes validation under default limits unchanged.
pub fn sample_png() -> Vec<u8> {
    let buf = png_of_size(64, 64);
    debug_assert!(buf.len() <= ImageLimits::default().max_file_size);
    buf
}

/// A gradient PNG of the given dimensions.
pub fn png_of_size(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x * 4 % 256) as u8, (y * 4 % 256) as u8, 90])
    });
    let mut buf = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}
