//! Chunked file uploads over client-streaming methods.

use bytes::Bytes;
use dynrpc_common::{MessageStream, Result, RpcError, TypedMessage};
use dynrpc_schema::{FieldDescriptor, FieldType, MessageDescriptor, ScalarType, SchemaIndex};
use futures::stream::{self, StreamExt};
use std::fmt;
use std::path::Path;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::Poll;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::builder::BINARY_FIELD_NAMES;

/// Default upload chunk size (1 MiB).
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

const NAME_FIELDS: [&str; 3] = ["file_name", "filename", "name"];
const CONTENT_TYPE_FIELDS: [&str; 3] = ["mime_type", "content_type", "media_type"];

/// A file to upload: its name, declared content type and a byte source.
pub struct FileUpload {
    pub name: String,
    pub content_type: String,
    reader: Pin<Box<dyn AsyncRead + Send>>,
}

impl FileUpload {
    pub fn new(
        name: impl Into<String>,
        content_type: impl Into<String>,
        reader: impl AsyncRead + Send + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            reader: Box::pin(reader),
        }
    }

    /// Upload of an in-memory buffer.
    pub fn from_bytes(name: impl Into<String>, content_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self::new(name, content_type, std::io::Cursor::new(data.into()))
    }
}

impl fmt::Debug for FileUpload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileUpload")
            .field("name", &self.name)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// Where the pieces of a chunk go in a request message.
///
/// Either the request carries a bytes field itself, or it wraps a chunk
/// message in one of its fields (`FileRequest { FileChunk file_chunk }`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkLayout {
    request_type: String,
    /// Field and type of the wrapped chunk message, if any.
    wrapper: Option<(String, String)>,
    data_field: String,
    name_field: Option<String>,
    content_type_field: Option<String>,
}

impl ChunkLayout {
    /// Derives the layout for `request`, resolving nested message types
    /// against `index` with `file` (the defining IDL file) searched first.
    pub fn for_request(request: &MessageDescriptor, index: &SchemaIndex, file: &Path) -> Result<Self> {
        if let Some(layout) = Self::direct(&request.name, request) {
            return Ok(layout);
        }

        for field in request.fields.iter().filter(|f| !f.is_repeated()) {
            let Some(type_name) = field.field_type.message_name() else {
                continue;
            };
            let Some(nested) = index.resolve_message(file, type_name) else {
                continue;
            };
            if let Some(mut layout) = Self::direct(&request.name, nested) {
                layout.wrapper = Some((field.name.clone(), nested.name.clone()));
                return Ok(layout);
            }
        }

        Err(RpcError::InvalidRequest(format!(
            "request type '{}' has no bytes field to carry file chunks",
            request.name
        )))
    }

    fn direct(request_type: &str, message: &MessageDescriptor) -> Option<Self> {
        let singular_bytes = |f: &&FieldDescriptor| f.field_type.is_bytes() && !f.is_repeated();
        let data = BINARY_FIELD_NAMES
            .iter()
            .find_map(|name| message.field(name).filter(singular_bytes))
            .or_else(|| message.fields.iter().find(singular_bytes))?;

        Some(Self {
            request_type: request_type.to_string(),
            wrapper: None,
            data_field: data.name.clone(),
            name_field: string_field(message, &NAME_FIELDS),
            content_type_field: string_field(message, &CONTENT_TYPE_FIELDS),
        })
    }

    pub fn data_field(&self) -> &str {
        &self.data_field
    }

    pub fn wrapper_field(&self) -> Option<&str> {
        self.wrapper.as_ref().map(|(field, _)| field.as_str())
    }

    /// Builds the request message carrying one chunk.
    pub fn chunk_message(&self, data: Bytes, name: &str, content_type: &str) -> TypedMessage {
        let chunk_type = match &self.wrapper {
            Some((_, type_name)) => type_name.as_str(),
            None => self.request_type.as_str(),
        };

        let mut chunk = TypedMessage::new(chunk_type).with_field(&self.data_field, data);
        if let Some(field) = &self.name_field {
            chunk.set(field, name);
        }
        if let Some(field) = &self.content_type_field {
            chunk.set(field, content_type);
        }

        match &self.wrapper {
            Some((field, _)) => TypedMessage::new(&self.request_type).with_field(field, chunk),
            None => chunk,
        }
    }
}

fn string_field(message: &MessageDescriptor, candidates: &[&str]) -> Option<String> {
    candidates
        .iter()
        .filter_map(|name| message.field(name))
        .find(|f| f.field_type == FieldType::Scalar(ScalarType::String) && !f.is_repeated())
        .map(|f| f.name.clone())
}

/// Observes a request stream on its way into the transport.
///
/// A client-streaming call only counts as successful once every message has
/// been pulled: a transport that answers early has delivered a partial
/// upload. Read failures from the upload source end the stream and are
/// reported here rather than through the transport.
#[derive(Debug, Default)]
pub(crate) struct DrainTracker {
    exhausted: AtomicBool,
    read_error: Mutex<Option<std::io::Error>>,
}

impl DrainTracker {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn track(self: &Arc<Self>, requests: MessageStream) -> MessageStream {
        let tracker = Arc::clone(self);
        requests
            .chain(stream::poll_fn(move |_| {
                tracker.exhausted.store(true, Ordering::SeqCst);
                Poll::Ready(None)
            }))
            .boxed()
    }

    fn fail(&self, err: std::io::Error) {
        let mut slot = self.read_error.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        slot.get_or_insert(err);
    }

    /// Checks the stream's fate after the transport returned `response`.
    pub(crate) fn finish(&self, response: Result<TypedMessage>) -> Result<TypedMessage> {
        let taken = self
            .read_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(err) = taken {
            return Err(RpcError::Io(err));
        }

        let response = response?;
        if !self.exhausted.load(Ordering::SeqCst) {
            return Err(RpcError::Transport(
                "transport returned before the request stream was drained".into(),
            ));
        }
        Ok(response)
    }
}

struct ChunkState {
    upload: FileUpload,
    layout: ChunkLayout,
    chunk_size: usize,
    tracker: Arc<DrainTracker>,
    done: bool,
}

/// Splits `upload` into request messages of at most `chunk_size` bytes,
/// each carrying the file's name and content type. Lazy: nothing is read
/// until the transport polls. An empty source yields no messages.
pub(crate) fn chunk_stream(
    upload: FileUpload,
    layout: ChunkLayout,
    chunk_size: usize,
    tracker: Arc<DrainTracker>,
) -> MessageStream {
    let state = ChunkState {
        upload,
        layout,
        chunk_size: chunk_size.max(1),
        tracker,
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        if state.done {
            return None;
        }

        let mut buf = vec![0u8; state.chunk_size];
        let mut filled = 0;
        while filled < state.chunk_size {
            match state.upload.reader.read(&mut buf[filled..]).await {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) => {
                    state.tracker.fail(e);
                    return None;
                }
            }
        }

        if filled < state.chunk_size {
            state.done = true;
        }
        if filled == 0 {
            return None;
        }

        buf.truncate(filled);
        let message = state.layout.chunk_message(
            Bytes::from(buf),
            &state.upload.name,
            &state.upload.content_type,
        );
        Some((message, state))
    })
    .boxed()
}
