/*!
Audio stream relay

A track id is resolved to either a pre-signed CDN location or an
already open audio body, and the bytes are piped to the caller in
bounded chunks. Nothing is buffered beyond one chunk, so a slow caller
stalls the upstream read instead of growing memory.
*/
use std::cmp;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::io::{AsyncBufRead, AsyncRead};
use futures::ready;
use surf::{StatusCode, Url};

use crate::soundcloud::SoundCloud;
use crate::{Error, Result};

pub const CHUNK_SIZE: usize = 8 * 1024;
pub const DEFAULT_CONTENT_TYPE: &str = "audio/mpeg";

/// An open upstream audio body and the metadata mirrored to the caller
pub struct AudioSource {
    pub content_type: String,
    pub content_length: Option<u64>,
    pub body: surf::Body,
}

impl AudioSource {
    fn from_response(mut resp: surf::Response) -> Self {
        let content_type = resp
            .header("content-type")
            .map(|v| v.as_str().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
        let content_length = resp
            .header("content-length")
            .and_then(|v| v.as_str().trim().parse::<u64>().ok());
        Self {
            content_type,
            content_length,
            body: resp.take_body(),
        }
    }
}

/// Where the audio for a track comes from
pub enum StreamTarget {
    /// A pre-signed link that needs no credentials
    Redirect(Url),
    /// The resolve response itself carried the audio
    Inline(AudioSource),
}

fn is_redirect(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MovedPermanently
            | StatusCode::Found
            | StatusCode::SeeOther
            | StatusCode::TemporaryRedirect
            | StatusCode::PermanentRedirect
    )
}

fn is_audio(resp: &surf::Response) -> bool {
    resp.header("content-type")
        .map(|v| v.as_str().trim().to_ascii_lowercase().starts_with("audio"))
        .unwrap_or(false)
}

/// Sort a stream location response into a target. `request_url` is the
/// url the response answered, used to resolve a relative `Location`.
pub fn classify(resp: surf::Response, request_url: &Url, track_id: u64) -> Result<StreamTarget> {
    let status = resp.status();
    if is_redirect(status) {
        return resp
            .header("location")
            .and_then(|loc| request_url.join(loc.as_str().trim()).ok())
            .map(StreamTarget::Redirect)
            .ok_or(Error::StreamUnavailable(track_id));
    }
    if status == StatusCode::Ok && is_audio(&resp) {
        return Ok(StreamTarget::Inline(AudioSource::from_response(resp)));
    }
    Err(Error::StreamUnavailable(track_id))
}

/// Ask soundcloud where the audio for `track_id` lives. No retries,
/// and a different status than expected is reported as unavailable.
pub async fn resolve(
    sc: &SoundCloud,
    token: &str,
    track_id: u64,
    log: &slog::Logger,
) -> Result<StreamTarget> {
    let url = sc.api_url(&format!("/tracks/{}/stream", track_id), &[])?;
    let resp = match sc.send_authed(url.clone(), token).await {
        Ok(resp) => resp,
        Err(e) => {
            slog::warn!(log, "stream resolve request failed"; "track_id" => track_id, "error" => %e);
            return Err(Error::StreamUnavailable(track_id));
        }
    };
    let status: u16 = resp.status().into();
    match classify(resp, &url, track_id) {
        Ok(target) => {
            let kind = match target {
                StreamTarget::Redirect(_) => "redirect",
                StreamTarget::Inline(_) => "inline",
            };
            slog::info!(log, "resolved stream"; "track_id" => track_id, "kind" => kind);
            Ok(target)
        }
        Err(e) => {
            slog::warn!(log, "stream unavailable"; "track_id" => track_id, "upstream_status" => status);
            Err(e)
        }
    }
}

/// Open the audio body for a resolved target. A redirect costs one more
/// unauthenticated request; an inline target is used as is.
pub async fn open(
    sc: &SoundCloud,
    target: StreamTarget,
    track_id: u64,
    log: &slog::Logger,
) -> Result<AudioSource> {
    let url = match target {
        StreamTarget::Inline(source) => return Ok(source),
        StreamTarget::Redirect(url) => url,
    };
    let resp = match sc.send_plain(url).await {
        Ok(resp) => resp,
        Err(e) => {
            slog::warn!(log, "cdn request failed"; "track_id" => track_id, "error" => %e);
            return Err(Error::StreamUnavailable(track_id));
        }
    };
    if !resp.status().is_success() {
        let status: u16 = resp.status().into();
        slog::warn!(log, "cdn refused stream"; "track_id" => track_id, "cdn_status" => status);
        return Err(Error::StreamUnavailable(track_id));
    }
    Ok(AudioSource::from_response(resp))
}

/// Build the caller's response, relaying `source` chunk by chunk.
pub fn into_response(source: AudioSource, track_id: u64, log: &slog::Logger) -> tide::Response {
    let len = source.content_length.map(|l| l as usize);
    let reader = ChunkReader::new(
        source.body,
        log.new(slog::o!("track_id" => track_id)),
    );
    let mut res = tide::Response::new(tide::StatusCode::Ok);
    res.set_body(tide::Body::from_reader(reader, len));
    res.insert_header("content-type", source.content_type);
    res
}

/// Reads at most `CHUNK_SIZE` bytes from the inner reader at a time and
/// hands each chunk out whole before reading the next.
///
/// An inner read error ends the body early with that error; the
/// connection is then closed without a completion marker.
pub struct ChunkReader<R> {
    inner: R,
    buf: Box<[u8]>,
    pos: usize,
    filled: usize,
    relayed: u64,
    done: bool,
    log: slog::Logger,
}

impl<R> ChunkReader<R> {
    pub fn new(inner: R, log: slog::Logger) -> Self {
        Self {
            inner,
            buf: vec![0; CHUNK_SIZE].into_boxed_slice(),
            pos: 0,
            filled: 0,
            relayed: 0,
            done: false,
            log,
        }
    }

    pub fn relayed(&self) -> u64 {
        self.relayed
    }
}

impl<R: AsyncRead + Unpin> AsyncBufRead for ChunkReader<R> {
    fn poll_fill_buf(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<&[u8]>> {
        let this = self.get_mut();
        while this.pos >= this.filled {
            if this.done {
                return Poll::Ready(Ok(&[]));
            }
            match ready!(Pin::new(&mut this.inner).poll_read(cx, &mut this.buf[..])) {
                Ok(0) => {
                    this.done = true;
                    slog::info!(this.log, "stream relayed"; "bytes" => this.relayed);
                }
                Ok(n) => {
                    this.pos = 0;
                    this.filled = n;
                    this.relayed += n as u64;
                }
                Err(e) => {
                    this.done = true;
                    slog::warn!(
                        this.log, "upstream dropped mid-stream";
                        "bytes" => this.relayed,
                        "error" => %e,
                    );
                    return Poll::Ready(Err(e));
                }
            }
        }
        Poll::Ready(Ok(&this.buf[this.pos..this.filled]))
    }

    fn consume(self: Pin<&mut Self>, amt: usize) {
        let this = self.get_mut();
        this.pos = cmp::min(this.pos + amt, this.filled);
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ChunkReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        out: &mut [u8],
    ) -> Poll<io::Result<usize>> {
        let available = ready!(self.as_mut().poll_fill_buf(cx))?;
        let n = cmp::min(available.len(), out.len());
        out[..n].copy_from_slice(&available[..n]);
        self.consume(n);
        Poll::Ready(Ok(n))
    }
}

impl<R> Drop for ChunkReader<R> {
    fn drop(&mut self) {
        if !self.done {
            // caller went away, dropping the inner body closes upstream
            slog::info!(self.log, "caller disconnected"; "bytes" => self.relayed);
        }
    }
}
