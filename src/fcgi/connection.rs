//! One accepted FastCGI connection.
//!
//! The connection is read strictly request by request: [`FcgiConnection::next_begin`]
//! waits for a `BEGIN_REQUEST`, [`FcgiConnection::read_input`] collects the
//! request's PARAMS and STDIN streams, and [`FcgiConnection::write_response`]
//! sends the CGI response and ends the request.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufStream};

use super::ProtocolError;
use super::protocol::{
    self, BeginRequest, MAX_CONNS, MAX_REQS, MPXS_CONNS, NULL_REQUEST_ID, ProtocolStatus,
    RESPONDER, RecordHeader, RecordType, nv,
};
use crate::constants::{FCGI_HEADER_LEN, FCGI_MAX_CONTENT_LEN, MAX_BODY_SIZE_BYTES, MAX_PARAMS_SIZE_BYTES};
use crate::request::Response;

/// PARAMS and STDIN of one request.
#[derive(Debug, Default)]
pub struct RequestInput {
    pub params: Vec<(String, String)>,
    pub stdin: Vec<u8>,
}

struct Record {
    header: RecordHeader,
    content: Vec<u8>,
}

/// A FastCGI connection over any byte stream.
pub struct FcgiConnection<S> {
    stream: BufStream<S>,
    max_reqs: usize,
    max_body: usize,
}

impl<S: AsyncRead + AsyncWrite + Unpin> FcgiConnection<S> {
    /// Wrap a stream. `max_reqs` is reported for `FCGI_MAX_CONNS` and
    /// `FCGI_MAX_REQS`.
    pub fn new(stream: S, max_reqs: usize) -> Self {
        Self {
            stream: BufStream::new(stream),
            max_reqs,
            max_body: MAX_BODY_SIZE_BYTES,
        }
    }

    /// Override the STDIN size limit.
    #[must_use]
    pub fn with_max_body(mut self, max_body: usize) -> Self {
        self.max_body = max_body;
        self
    }

    /// Wait for the next `BEGIN_REQUEST` with the responder role.
    ///
    /// Returns `Ok(None)` when the peer closes the connection between
    /// requests. Management records and requests for other roles are
    /// answered in place.
    pub async fn next_begin(&mut self) -> Result<Option<BeginRequest>, ProtocolError> {
        loop {
            let Some(record) = self.read_record().await? else {
                return Ok(None);
            };
            let id = record.header.request_id;
            match record.header.record_type() {
                Some(RecordType::BeginRequest) => {
                    let begin = BeginRequest::parse(id, &record.content)?;
                    if begin.role == RESPONDER {
                        return Ok(Some(begin));
                    }
                    tracing::debug!(role = begin.role, request_id = id, "Rejecting unsupported role");
                    self.end_request(id, ProtocolStatus::UnknownRole).await?;
                },
                Some(RecordType::GetValues) if id == NULL_REQUEST_ID => {
                    self.answer_get_values(&record.content).await?;
                },
                _ if id == NULL_REQUEST_ID => {
                    self.write_record(
                        RecordType::UnknownType,
                        NULL_REQUEST_ID,
                        &protocol::unknown_type_body(record.header.rtype),
                    )
                    .await?;
                    self.stream.flush().await?;
                },
                // Leftovers of a finished request, e.g. a late ABORT_REQUEST.
                _ => {},
            }
        }
    }

    /// Read PARAMS and STDIN for `begin` until both streams are closed.
    pub async fn read_input(&mut self, begin: &BeginRequest) -> Result<RequestInput, ProtocolError> {
        let mut params = Vec::new();
        let mut input = RequestInput::default();
        let mut params_done = false;
        let mut stdin_done = false;

        while !(params_done && stdin_done) {
            let record = self
                .read_record()
                .await?
                .ok_or(ProtocolError::ConnectionClosed)?;
            let id = record.header.request_id;

            if id == NULL_REQUEST_ID {
                if record.header.record_type() == Some(RecordType::GetValues) {
                    self.answer_get_values(&record.content).await?;
                }
                continue;
            }
            if id != begin.request_id {
                if record.header.record_type() == Some(RecordType::BeginRequest) {
                    self.end_request(id, ProtocolStatus::CantMpxConn).await?;
                }
                continue;
            }

            match record.header.record_type() {
                Some(RecordType::Params) if !params_done => {
                    if record.content.is_empty() {
                        params_done = true;
                        input.params = nv::parse_pairs(&params)?;
                    } else {
                        if params.len() + record.content.len() > MAX_PARAMS_SIZE_BYTES {
                            return Err(ProtocolError::TooLarge {
                                what: "PARAMS",
                                limit: MAX_PARAMS_SIZE_BYTES,
                            });
                        }
                        params.extend_from_slice(&record.content);
                    }
                },
                Some(RecordType::Stdin) if !stdin_done => {
                    if record.content.is_empty() {
                        stdin_done = true;
                    } else {
                        if input.stdin.len() + record.content.len() > self.max_body {
                            return Err(ProtocolError::TooLarge {
                                what: "STDIN",
                                limit: self.max_body,
                            });
                        }
                        input.stdin.extend_from_slice(&record.content);
                    }
                },
                Some(RecordType::AbortRequest) => return Err(ProtocolError::Aborted(id)),
                _ => {},
            }
        }

        Ok(input)
    }

    /// Write `response` as STDOUT records and end the request.
    pub async fn write_response(
        &mut self,
        request_id: u16,
        response: &Response,
    ) -> Result<(), ProtocolError> {
        let head = response.cgi_head();
        let mut out = Vec::with_capacity(head.len() + response.body.len());
        out.extend_from_slice(head.as_bytes());
        out.extend_from_slice(&response.body);

        for chunk in out.chunks(FCGI_MAX_CONTENT_LEN) {
            self.write_record(RecordType::Stdout, request_id, chunk).await?;
        }
        self.write_record(RecordType::Stdout, request_id, &[]).await?;
        self.end_request(request_id, ProtocolStatus::RequestComplete)
            .await
    }

    /// Flush and shut down the write side.
    pub async fn close(mut self) -> Result<(), ProtocolError> {
        self.stream.flush().await?;
        self.stream.shutdown().await?;
        Ok(())
    }

    async fn read_record(&mut self) -> Result<Option<Record>, ProtocolError> {
        let mut head = [0u8; FCGI_HEADER_LEN];
        // EOF on the first byte is a clean close; anywhere later it is not.
        if self.stream.read(&mut head[..1]).await? == 0 {
            return Ok(None);
        }
        self.stream.read_exact(&mut head[1..]).await?;
        let header = RecordHeader::from_bytes(&head)?;

        let mut content =
            vec![0u8; usize::from(header.content_length) + usize::from(header.padding_length)];
        self.stream.read_exact(&mut content).await?;
        content.truncate(usize::from(header.content_length));

        Ok(Some(Record { header, content }))
    }

    async fn write_record(
        &mut self,
        rtype: RecordType,
        request_id: u16,
        content: &[u8],
    ) -> Result<(), ProtocolError> {
        let header = RecordHeader::new(rtype, request_id, content.len());
        self.stream.write_all(&header.to_bytes()).await?;
        self.stream.write_all(content).await?;
        let padding = [0u8; 8];
        self.stream
            .write_all(&padding[..usize::from(header.padding_length)])
            .await?;
        Ok(())
    }

    async fn end_request(&mut self, request_id: u16, status: ProtocolStatus) -> Result<(), ProtocolError> {
        self.write_record(
            RecordType::EndRequest,
            request_id,
            &protocol::end_request_body(0, status),
        )
        .await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn answer_get_values(&mut self, content: &[u8]) -> Result<(), ProtocolError> {
        let max = self.max_reqs.to_string();
        let mut body = Vec::new();
        for (name, _) in nv::parse_pairs(content)? {
            let value = match name.as_str() {
                MAX_CONNS | MAX_REQS => max.as_str(),
                MPXS_CONNS => "0",
                _ => continue,
            };
            nv::write_pair(&mut body, name.as_bytes(), value.as_bytes())?;
        }
        self.write_record(RecordType::GetValuesResult, NULL_REQUEST_ID, &body)
            .await?;
        self.stream.flush().await?;
        Ok(())
    }
}
