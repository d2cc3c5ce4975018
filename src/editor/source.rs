use crate::references::parse_data_url;
use anyhow::{anyhow, Context, Result};
use image::DynamicImage;
use reqwest::blocking::Client;
use std::time::Duration;

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Decode a bitmap from a base64 data URL, an http(s) URL or a local path.
pub fn load_bitmap(source: &str) -> Result<DynamicImage> {
    let bytes = if source.starts_with("data:") {
        parse_data_url(source)
            .ok_or_else(|| anyhow!("malformed data URL"))?
            .bytes
    } else if source.starts_with("http://") || source.starts_with("https://") {
        fetch(source)?
    } else {
        std::fs::read(source).with_context(|| format!("read {source}"))?
    };
    image::load_from_memory(&bytes).context("decode image")
}

fn fetch(url: &str) -> Result<Vec<u8>> {
    let client = Client::builder()
        .timeout(FETCH_TIMEOUT)
        .user_agent("scriptoon editor")
        .build()?;
    let resp = client
        .get(url)
        .send()
        .with_context(|| format!("fetch {url}"))?
        .error_for_status()?;
    Ok(resp.bytes()?.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::references::to_data_url;

    #[test]
    fn loads_from_data_url_and_path() {
        let img = image::RgbaImage::new(3, 2);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.png");
        img.save(&path).unwrap();

        let from_path = load_bitmap(path.to_str().unwrap()).unwrap();
        assert_eq!((from_path.width(), from_path.height()), (3, 2));

        let bytes = std::fs::read(&path).unwrap();
        let from_data = load_bitmap(&to_data_url("image/png", &bytes)).unwrap();
        assert_eq!((from_data.width(), from_data.height()), (3, 2));

        assert!(load_bitmap("data:image/png;base64,").is_err());
    }
}
