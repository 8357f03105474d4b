use crate::assets::AssetStore;
use crate::errors::{AppError, AppResult};
use crate::models::{ImageMime, Size};
use base64::Engine;
use image::{GenericImageView, ImageFormat, ImageOutputFormat};
use std::fs;
use std::io::Cursor;
use std::time::Duration;

const REMOTE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub bytes: Vec<u8>,
    pub mime: ImageMime,
    pub pixel_size: Size,
}

/// Content-fetch collaborator used when an image item is created from a URL
/// or path.
pub trait ContentFetcher {
    fn fetch(&self, source: &str) -> AppResult<Vec<u8>>;

    fn fetch_image(&self, source: &str) -> AppResult<DecodedImage> {
        let bytes = self.fetch(source).map_err(|error| match error {
            AppError::ContentFetch(message) => AppError::ContentFetch(message),
            other => AppError::ContentFetch(format!("{source}: {other}")),
        })?;
        decode_image(bytes)
    }
}

/// Reads local paths, `file:` URLs and `data:` URLs. Relative paths resolve
/// against the asset directory.
#[derive(Debug, Clone)]
pub struct FileFetcher {
    assets: AssetStore,
}

impl FileFetcher {
    pub fn new(assets: AssetStore) -> Self {
        Self { assets }
    }
}

impl ContentFetcher for FileFetcher {
    fn fetch(&self, source: &str) -> AppResult<Vec<u8>> {
        let source = source.trim();
        if let Some(data_url) = source.strip_prefix("data:") {
            return decode_data_url(data_url);
        }
        if is_remote(source) {
            return Err(AppError::ContentFetch(format!(
                "remote source must be prefetched: {source}"
            )));
        }
        let path = self
            .assets
            .resolve_url(source)
            .map_err(|error| AppError::ContentFetch(error.to_string()))?;
        fs::read(&path)
            .map_err(|error| AppError::ContentFetch(format!("{}: {}", path.to_string_lossy(), error)))
    }
}

pub fn is_remote(source: &str) -> bool {
    let source = source.trim_start();
    ["http://", "https://"].iter().any(|scheme| {
        source
            .get(..scheme.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(scheme))
    })
}

/// Downloads `http(s)` sources off the model loop; any other source is read
/// through the local fetcher.
#[derive(Debug, Clone)]
pub struct RemoteFetcher {
    client: reqwest::Client,
    local: FileFetcher,
}

impl RemoteFetcher {
    pub fn new(local: FileFetcher) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(REMOTE_TIMEOUT)
            .user_agent(concat!("freenote/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, local })
    }

    pub async fn prefetch(&self, source: &str) -> AppResult<Prefetched> {
        let bytes = if is_remote(source) {
            self.download(source.trim()).await?
        } else {
            self.local.fetch(source)?
        };
        Ok(Prefetched {
            source: source.to_string(),
            bytes,
        })
    }

    async fn download(&self, url: &str) -> AppResult<Vec<u8>> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::ContentFetch(format!("{url}: server answered {status}")));
        }
        let bytes = response.bytes().await?;
        tracing::debug!(url, bytes = bytes.len(), "remote image downloaded");
        Ok(bytes.to_vec())
    }
}

/// Bytes already in hand for one source, handed to item construction.
#[derive(Debug, Clone)]
pub struct Prefetched {
    source: String,
    bytes: Vec<u8>,
}

impl Prefetched {
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl ContentFetcher for Prefetched {
    fn fetch(&self, source: &str) -> AppResult<Vec<u8>> {
        if source != self.source {
            return Err(AppError::ContentFetch(format!(
                "{source} was not prefetched (have {})",
                self.source
            )));
        }
        Ok(self.bytes.clone())
    }
}

fn decode_data_url(data_url: &str) -> AppResult<Vec<u8>> {
    let Some((header, payload)) = data_url.split_once(',') else {
        return Err(AppError::ContentFetch("malformed data url".to_string()));
    };
    if !header.split(';').any(|part| part.eq_ignore_ascii_case("base64")) {
        return Err(AppError::ContentFetch(
            "only base64 data urls carry image bytes".to_string(),
        ));
    }
    base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|error| AppError::ContentFetch(format!("invalid base64 payload: {error}")))
}

/// Sniffs the format and pixel size. PNG and GIF bytes are kept verbatim;
/// any other decodable format is re-encoded as PNG.
pub fn decode_image(bytes: Vec<u8>) -> AppResult<DecodedImage> {
    let format = image::guess_format(&bytes)
        .map_err(|error| AppError::ContentFetch(format!("unrecognized image data: {error}")))?;

    let decoded = match format {
        ImageFormat::Png | ImageFormat::Gif => {
            let (width, height) = image::io::Reader::with_format(Cursor::new(&bytes), format)
                .into_dimensions()
                .map_err(|error| AppError::ContentFetch(format!("undecodable image: {error}")))?;
            let mime = if format == ImageFormat::Gif {
                ImageMime::Gif
            } else {
                ImageMime::Png
            };
            DecodedImage {
                bytes,
                mime,
                pixel_size: pixel_size(width, height)?,
            }
        }
        other => {
            let image = image::load_from_memory_with_format(&bytes, other)?;
            let (width, height) = image.dimensions();
            let mut png = Cursor::new(Vec::new());
            image.write_to(&mut png, ImageOutputFormat::Png)?;
            DecodedImage {
                bytes: png.into_inner(),
                mime: ImageMime::Png,
                pixel_size: pixel_size(width, height)?,
            }
        }
    };
    Ok(decoded)
}

fn pixel_size(width: u32, height: u32) -> AppResult<Size> {
    if width == 0 || height == 0 {
        return Err(AppError::ContentFetch("image has no pixels".to_string()));
    }
    let width = i32::try_from(width)
        .map_err(|_| AppError::ContentFetch(format!("image width {width} is too large")))?;
    let height = i32::try_from(height)
        .map_err(|_| AppError::ContentFetch(format!("image height {height} is too large")))?;
    Ok(Size::new(width, height))
}

#[cfg(test)]
pub(crate) mod test_support {
    use base64::Engine;
    use image::{DynamicImage, ImageOutputFormat, RgbImage, RgbaImage};
    use std::io::Cursor;

    pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        encode(DynamicImage::ImageRgba8(RgbaImage::new(width, height)), ImageOutputFormat::Png)
    }

    pub fn gif_bytes(width: u32, height: u32) -> Vec<u8> {
        encode(DynamicImage::ImageRgba8(RgbaImage::new(width, height)), ImageOutputFormat::Gif)
    }

    pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
        encode(DynamicImage::ImageRgb8(RgbImage::new(width, height)), ImageOutputFormat::Jpeg(80))
    }

    pub fn data_url(bytes: &[u8]) -> String {
        format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(bytes)
        )
    }

    /// Serves one canned HTTP response per connection.
    pub async fn serve(status: &'static str, body: Vec<u8>) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test server");
        let address = listener.local_addr().expect("server address");
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let mut request = vec![0_u8; 4096];
                let _ = stream.read(&mut request).await;
                let head = format!(
                    "HTTP/1.1 {status}\r\ncontent-type: image/png\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                    body.len()
                );
                let _ = stream.write_all(head.as_bytes()).await;
                let _ = stream.write_all(&body).await;
                let _ = stream.shutdown().await;
            }
        });
        format!("http://{address}")
    }

    fn encode(image: DynamicImage, format: ImageOutputFormat) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        image.write_to(&mut out, format).expect("encode test image");
        out.into_inner()
    }
}
