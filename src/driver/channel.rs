//! M4.3: Channel
//!
//! 채널 (연결 + 메시지 디스패처)
//!
//! 채널 하나는 소켓 하나와 미응답 요청의 FIFO 큐를 소유하는 단일 액터
//! 태스크입니다. 디스패처 상태는 그 태스크만 만지므로 잠금이 필요 없습니다.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::Framed;

use crate::gram::handshake::{
    build_client_handshake, parse_handshake_response, HANDSHAKE_RESPONSE_SIZE,
};
use crate::gram::{
    ClientMessageCodec, GramError, GramVersion, RecordMessage, Request, Response, SuccessMessage,
};

use super::driver::Address;
use super::error::{DriverError, DriverResult};
use super::protocol::ProtocolVersion;

// ============================================================================
// Exchange - 요청 하나의 최종 결과
// ============================================================================

/// 요청 하나에 대한 서버 응답 (레코드 + 종결 SUCCESS 메타데이터)
#[derive(Debug)]
pub struct Exchange {
    /// 종결 응답 전에 도착한 RECORD들
    pub records: Vec<RecordMessage>,
    /// 종결 SUCCESS 메타데이터
    pub summary: SuccessMessage,
}

// ============================================================================
// PendingRequest - 미응답 요청
// ============================================================================

/// 디스패처 큐에 등록된 (요청, 응답 핸들러) 쌍
struct PendingRequest {
    /// 로깅용 요청 이름
    name: &'static str,
    /// 지금까지 수신한 레코드
    records: Vec<RecordMessage>,
    /// 종결 응답 전달 채널
    reply: oneshot::Sender<DriverResult<Exchange>>,
}

/// 액터에 전달되는 명령
enum Command {
    /// 요청 전송 (응답을 기대하지 않으면 reply가 None)
    Send {
        request: Request,
        reply: Option<oneshot::Sender<DriverResult<Exchange>>>,
    },
    /// 서버 힌트로 받은 읽기 타임아웃 적용
    SetReadTimeout(Option<Duration>),
    /// 소켓 종료
    Shutdown,
}

/// 종결 응답을 기다리는 핸들
pub struct ResponseFuture {
    rx: oneshot::Receiver<DriverResult<Exchange>>,
}

impl ResponseFuture {
    /// 종결 응답 수신
    pub async fn recv(self) -> DriverResult<Exchange> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(DriverError::connection(
                "Channel closed before response arrived",
            )),
        }
    }
}

/// 치명적 에러를 큐에 남은 핸들러 수만큼 복제
fn replicate(err: &DriverError) -> DriverError {
    match err {
        DriverError::Protocol(msg) => DriverError::Protocol(msg.clone()),
        DriverError::Connection(msg) => DriverError::Connection(msg.clone()),
        DriverError::Timeout(msg) => DriverError::Timeout(msg.clone()),
        DriverError::UntrustedServer(msg) => DriverError::UntrustedServer(msg.clone()),
        other => DriverError::Connection(other.to_string()),
    }
}

// ============================================================================
// Channel - 채널
// ============================================================================

/// 하나의 Gram 연결과 협상된 프로토콜 상태
pub struct Channel {
    /// 로컬 채널 ID (풀에서 발급)
    id: u64,
    /// 서버 주소
    address: Address,
    /// 협상된 프로토콜 버전 전략
    protocol: ProtocolVersion,
    /// 액터 명령 큐
    commands: mpsc::UnboundedSender<Command>,
    /// 치명적 에러 발생 여부 (액터가 설정)
    broken: Arc<AtomicBool>,
    /// 로컬에서 닫힘 (close_gracefully가 즉시 설정)
    closed: AtomicBool,
    /// HELLO 성공이 보고한 서버 에이전트
    pub(crate) server_agent: Option<String>,
    /// HELLO 성공이 보고한 연결 ID
    pub(crate) connection_id: Option<String>,
    /// 서버 힌트로 받은 읽기 타임아웃
    pub(crate) read_timeout: Option<Duration>,
    /// 생성 시간
    created_at: Instant,
    /// 마지막 사용 시간
    last_used: Instant,
}

impl Channel {
    /// 핸드셰이크를 수행하고 채널 액터를 기동
    ///
    /// HELLO는 아직 보내지 않은 상태로 반환됩니다. 초기화는
    /// [`ProtocolVersion::initialize_channel`]이 수행합니다.
    pub async fn establish<S>(mut io: S, id: u64, address: Address) -> DriverResult<Channel>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let proposals = GramVersion::ALL;
        io.write_all(&build_client_handshake(&proposals)).await?;
        io.flush().await?;

        let mut response = [0u8; HANDSHAKE_RESPONSE_SIZE];
        io.read_exact(&mut response).await.map_err(|e| {
            DriverError::connection(format!("Handshake read failed: {}", e))
        })?;

        let version = parse_handshake_response(response, &proposals)
            .map_err(|e| DriverError::protocol(format!("Handshake: {}", e)))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let broken = Arc::new(AtomicBool::new(false));

        let actor = ChannelActor {
            framed: Framed::new(io, ClientMessageCodec::new()),
            commands: rx,
            broken: broken.clone(),
        };
        tokio::spawn(actor.run());

        let now = Instant::now();
        Ok(Channel {
            id,
            address,
            protocol: ProtocolVersion::new(version),
            commands: tx,
            broken,
            closed: AtomicBool::new(false),
            server_agent: None,
            connection_id: None,
            read_timeout: None,
            created_at: now,
            last_used: now,
        })
    }

    /// 요청 전송, 핸들러 등록
    ///
    /// 에러는 반환된 핸들을 통해서만 전달됩니다. 응답을 기대하지 않는
    /// 요청(GOODBYE)은 [`Channel::send_dont_wait`]를 사용합니다.
    pub fn send(&self, request: Request) -> DriverResult<ResponseFuture> {
        debug_assert!(request.expects_response());
        let name = request.name();
        if !self.is_open() {
            return Err(DriverError::connection(format!(
                "Channel is closed, cannot send {}",
                name
            )));
        }
        let (tx, rx) = oneshot::channel();

        self.commands
            .send(Command::Send {
                request,
                reply: Some(tx),
            })
            .map_err(|_| {
                DriverError::connection(format!("Channel is closed, cannot send {}", name))
            })?;

        Ok(ResponseFuture { rx })
    }

    /// 응답 없는 요청 전송 (GOODBYE)
    pub fn send_dont_wait(&self, request: Request) {
        let _ = self.commands.send(Command::Send {
            request,
            reply: None,
        });
    }

    /// 요청 전송 후 종결 응답까지 대기
    pub async fn request(&self, request: Request) -> DriverResult<Exchange> {
        self.send(request)?.recv().await
    }

    /// RESET으로 서버 측 상태 초기화 (풀의 생존 확인에 사용)
    pub async fn reset(&self) -> DriverResult<()> {
        self.request(Request::Reset).await?;
        Ok(())
    }

    /// 읽기 타임아웃 힌트 적용
    pub(crate) fn apply_read_timeout(&mut self, timeout: Duration) {
        self.read_timeout = Some(timeout);
        let _ = self.commands.send(Command::SetReadTimeout(Some(timeout)));
    }

    /// GOODBYE 전송 후 소켓 종료
    pub fn close_gracefully(&self) {
        if !self.is_broken() {
            self.send_dont_wait(Request::Goodbye);
        }
        self.closed.store(true, Ordering::SeqCst);
        let _ = self.commands.send(Command::Shutdown);
    }

    /// 치명적 에러 발생 여부
    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::SeqCst)
    }

    /// 사용 가능 여부
    pub fn is_open(&self) -> bool {
        !self.is_broken()
            && !self.closed.load(Ordering::SeqCst)
            && !self.commands.is_closed()
    }

    /// 로컬 채널 ID
    pub fn id(&self) -> u64 {
        self.id
    }

    /// 서버 주소
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// 협상된 프로토콜 버전 전략
    pub fn protocol(&self) -> ProtocolVersion {
        self.protocol
    }

    /// 서버 에이전트 문자열
    pub fn server_agent(&self) -> Option<&str> {
        self.server_agent.as_deref()
    }

    /// 서버가 발급한 연결 ID
    pub fn connection_id(&self) -> Option<&str> {
        self.connection_id.as_deref()
    }

    /// 생성 시간
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// 마지막 사용 시간
    pub fn last_used(&self) -> Instant {
        self.last_used
    }

    /// 사용 시간 갱신
    pub(crate) fn mark_used(&mut self) {
        self.last_used = Instant::now();
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("protocol", &self.protocol.version())
            .field("connection_id", &self.connection_id)
            .field("broken", &self.is_broken())
            .finish()
    }
}

// ============================================================================
// ChannelActor - 채널 액터
// ============================================================================

/// 소켓과 디스패처 큐를 소유하는 액터
struct ChannelActor<S> {
    framed: Framed<S, ClientMessageCodec>,
    commands: mpsc::UnboundedReceiver<Command>,
    broken: Arc<AtomicBool>,
}

impl<S> ChannelActor<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn run(self) {
        let ChannelActor {
            mut framed,
            mut commands,
            broken,
        } = self;

        let mut pending: VecDeque<PendingRequest> = VecDeque::new();
        let mut read_timeout: Option<Duration> = None;

        let fatal = loop {
            // 미응답 요청이 있을 때만 읽기 타임아웃 적용
            let effective_timeout = if pending.is_empty() { None } else { read_timeout };

            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(Command::Send { request, reply }) => {
                        let name = request.name();
                        let expects_response = request.expects_response();

                        if let Err(e) = framed.send(request).await {
                            let err = DriverError::from(e);
                            if let Some(reply) = reply {
                                let _ = reply.send(Err(replicate(&err)));
                            }
                            break err;
                        }
                        tracing::trace!(msg = name, "sent");

                        if expects_response {
                            if let Some(reply) = reply {
                                pending.push_back(PendingRequest {
                                    name,
                                    records: Vec::new(),
                                    reply,
                                });
                            }
                        }
                    }
                    Some(Command::SetReadTimeout(timeout)) => read_timeout = timeout,
                    Some(Command::Shutdown) | None => {
                        break DriverError::connection("Channel closed");
                    }
                },
                frame = next_frame(&mut framed, effective_timeout) => match frame {
                    Some(Ok(Response::Record(record))) => {
                        match pending.front_mut() {
                            Some(front) => front.records.push(record),
                            None => break DriverError::protocol(
                                "RECORD received with no pending request",
                            ),
                        }
                    }
                    Some(Ok(response)) => {
                        // 핸들러를 먼저 꺼낸 뒤 완료시킵니다. 완료 콜백이 새
                        // 요청을 큐에 넣어도 자기 자신과 매칭되지 않습니다.
                        let request = match pending.pop_front() {
                            Some(request) => request,
                            None => break DriverError::protocol(format!(
                                "{} received with no pending request",
                                response.name(),
                            )),
                        };
                        tracing::trace!(request = request.name, response = response.name(), "dispatched");

                        let result = match response {
                            Response::Success(summary) => Ok(Exchange {
                                records: request.records,
                                summary,
                            }),
                            Response::Failure(failure) => Err(DriverError::from(failure)),
                            Response::Ignored => Err(DriverError::session(format!(
                                "{} was ignored by the server",
                                request.name,
                            ))),
                            Response::Record(_) => unreachable!(),
                        };
                        let _ = request.reply.send(result);
                    }
                    Some(Err(e)) => break DriverError::from(e),
                    None => break DriverError::connection("Connection closed by server"),
                },
            }
        };

        broken.store(true, Ordering::SeqCst);
        tracing::debug!(error = %fatal, queued = pending.len(), "channel failed");

        // 치명적 에러를 큐에 남은 모든 핸들러에 FIFO 순서로 전파
        for request in pending {
            let _ = request.reply.send(Err(replicate(&fatal)));
        }

        // 이미 큐잉된 명령도 실패 처리
        commands.close();
        while let Ok(cmd) = commands.try_recv() {
            if let Command::Send {
                reply: Some(reply), ..
            } = cmd
            {
                let _ = reply.send(Err(replicate(&fatal)));
            }
        }

        let _ = framed.close().await;
    }
}

/// 다음 인바운드 프레임 수신 (타임아웃 선택적)
async fn next_frame<S>(
    framed: &mut Framed<S, ClientMessageCodec>,
    timeout: Option<Duration>,
) -> Option<Result<Response, GramError>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match timeout {
        Some(limit) => match tokio::time::timeout(limit, framed.next()).await {
            Ok(frame) => frame,
            Err(_) => Some(Err(GramError::Connection(
                "Server did not respond within the read timeout".to_string(),
            ))),
        },
        None => framed.next().await,
    }
}

// ============================================================================
// Test plumbing - 스크립트 서버
// ============================================================================

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::gram::message::tag;
    use crate::gram::value::WireValue;
    use crate::gram::GramCodec;
    use tokio::io::DuplexStream;
    use tokio::task::JoinHandle;

    /// 인바운드 요청 하나마다 스크립트의 응답 묶음 하나를 돌려주는 서버
    pub(crate) fn spawn_scripted_server(
        mut io: DuplexStream,
        select: GramVersion,
        script: Vec<Vec<Response>>,
        close_at_end: bool,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut handshake = [0u8; crate::gram::HANDSHAKE_SIZE];
            if io.read_exact(&mut handshake).await.is_err() {
                return;
            }
            if io.write_all(&select.to_bytes()).await.is_err() {
                return;
            }

            let mut framed = Framed::new(io, GramCodec::new());
            for batch in script {
                loop {
                    match framed.next().await {
                        Some(Ok(value)) => {
                            // GOODBYE에는 응답하지 않음
                            if value.as_structure().map(|s| s.tag) == Some(tag::GOODBYE) {
                                continue;
                            }
                            break;
                        }
                        _ => return,
                    }
                }
                for response in batch {
                    let value = WireValue::Structure(response.to_structure());
                    if framed.send(value).await.is_err() {
                        return;
                    }
                }
            }

            if close_at_end {
                return;
            }
            // GOODBYE/EOF까지 대기
            while let Some(Ok(_)) = framed.next().await {}
        })
    }

    /// 모든 요청에 빈 SUCCESS로 답하는 서버 (풀 테스트용)
    pub(crate) fn spawn_success_server(mut io: DuplexStream) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut handshake = [0u8; crate::gram::HANDSHAKE_SIZE];
            if io.read_exact(&mut handshake).await.is_err() {
                return;
            }
            if io.write_all(&GramVersion::V2_1.to_bytes()).await.is_err() {
                return;
            }

            let mut framed = Framed::new(io, GramCodec::new());
            while let Some(Ok(value)) = framed.next().await {
                if value.as_structure().map(|s| s.tag) == Some(tag::GOODBYE) {
                    return;
                }
                let success =
                    WireValue::Structure(Response::Success(SuccessMessage::new()).to_structure());
                if framed.send(success).await.is_err() {
                    return;
                }
            }
        })
    }

    /// 스크립트 서버를 물린 채널 생성
    pub(crate) async fn scripted_channel(
        select: GramVersion,
        script: Vec<Vec<Response>>,
        close_at_end: bool,
    ) -> Channel {
        let (client_io, server_io) = tokio::io::duplex(65536);
        spawn_scripted_server(server_io, select, script, close_at_end);
        Channel::establish(client_io, 1, Address::new("testhost", 7787))
            .await
            .unwrap()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::gram::value::WireValue;
    use crate::gram::{FailureMessage, GramErrorCode, RunMessage};

    fn numbered_success(i: i64) -> Response {
        let mut msg = SuccessMessage::new();
        msg.add("n", WireValue::Integer(i));
        Response::Success(msg)
    }

    #[tokio::test]
    async fn test_negotiates_selected_version() {
        let channel = scripted_channel(GramVersion::V1_1, vec![], false).await;
        assert_eq!(channel.protocol().version(), GramVersion::V1_1);
        assert!(channel.is_open());
    }

    #[tokio::test]
    async fn test_handshake_rejected_when_no_common_version() {
        let (client_io, mut server_io) = tokio::io::duplex(4096);
        tokio::spawn(async move {
            let mut handshake = [0u8; crate::gram::HANDSHAKE_SIZE];
            server_io.read_exact(&mut handshake).await.unwrap();
            server_io.write_all(&[0, 0, 0, 0]).await.unwrap();
        });

        let err = Channel::establish(client_io, 1, Address::new("testhost", 7787))
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_fifo_ordering_across_pipelined_requests() {
        let script = vec![
            vec![numbered_success(1)],
            vec![numbered_success(2)],
            vec![numbered_success(3)],
        ];
        let channel = scripted_channel(GramVersion::V2_1, script, false).await;

        // 응답을 기다리지 않고 3개를 연달아 전송
        let first = channel.send(Request::Reset).unwrap();
        let second = channel.send(Request::Reset).unwrap();
        let third = channel.send(Request::Reset).unwrap();

        // 핸들러 호출 순서는 전송 순서와 같다
        assert_eq!(first.recv().await.unwrap().summary.get("n").unwrap().as_int(), Some(1));
        assert_eq!(second.recv().await.unwrap().summary.get("n").unwrap().as_int(), Some(2));
        assert_eq!(third.recv().await.unwrap().summary.get("n").unwrap().as_int(), Some(3));
    }

    #[tokio::test]
    async fn test_records_accumulate_on_oldest_handler() {
        let script = vec![vec![
            Response::Record(RecordMessage::new(vec![WireValue::Integer(1)])),
            Response::Record(RecordMessage::new(vec![WireValue::Integer(2)])),
            Response::Success(SuccessMessage::streaming_success(false, None)),
        ]];
        let channel = scripted_channel(GramVersion::V2_1, script, false).await;

        let exchange = channel
            .request(Request::Run(RunMessage::new("RETURN 1")))
            .await
            .unwrap();
        assert_eq!(exchange.records.len(), 2);
        assert_eq!(exchange.records[0].get(0).unwrap().as_int(), Some(1));
        assert_eq!(exchange.records[1].get(0).unwrap().as_int(), Some(2));
    }

    #[tokio::test]
    async fn test_failure_completes_handler_without_breaking_channel() {
        let script = vec![
            vec![Response::Failure(FailureMessage::new(
                GramErrorCode::SYNTAX_ERROR,
                "bad query",
            ))],
            vec![numbered_success(1)],
        ];
        let channel = scripted_channel(GramVersion::V2_1, script, false).await;

        let err = channel
            .request(Request::Run(RunMessage::new("oops")))
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Server { .. }));

        // 서버 수준 실패는 채널 자체를 죽이지 않는다
        assert!(channel.is_open());
        assert!(channel.request(Request::Reset).await.is_ok());
    }

    #[tokio::test]
    async fn test_ignored_completes_handler() {
        let script = vec![vec![Response::Ignored]];
        let channel = scripted_channel(GramVersion::V2_1, script, false).await;

        let err = channel.request(Request::Reset).await.unwrap_err();
        assert!(matches!(err, DriverError::Session(_)));
        assert!(channel.is_open());
    }

    #[tokio::test]
    async fn test_fatal_close_fails_all_queued_handlers() {
        // 스크립트 소진 후 서버가 연결을 끊는다
        let script = vec![vec![numbered_success(1)]];
        let channel = scripted_channel(GramVersion::V2_1, script, true).await;

        let first = channel.send(Request::Reset).unwrap();
        let second = channel.send(Request::Reset).unwrap();
        let third = channel.send(Request::Reset).unwrap();

        assert!(first.recv().await.is_ok());
        assert!(matches!(
            second.recv().await.unwrap_err(),
            DriverError::Connection(_)
        ));
        assert!(matches!(
            third.recv().await.unwrap_err(),
            DriverError::Connection(_)
        ));
    }

    #[tokio::test]
    async fn test_no_sends_after_fatal_error() {
        let channel = scripted_channel(GramVersion::V2_1, vec![], true).await;

        // 서버가 곧바로 끊으므로 첫 요청이 실패로 끝난다
        let err = channel.request(Request::Reset).await.unwrap_err();
        assert!(matches!(err, DriverError::Connection(_)));
        assert!(channel.is_broken());

        let result = channel.request(Request::Reset).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_unprompted_response_is_protocol_error() {
        let (client_io, mut server_io) = tokio::io::duplex(4096);
        tokio::spawn(async move {
            let mut handshake = [0u8; crate::gram::HANDSHAKE_SIZE];
            server_io.read_exact(&mut handshake).await.unwrap();
            server_io
                .write_all(&GramVersion::V2_1.to_bytes())
                .await
                .unwrap();

            // 요청이 없는데 SUCCESS를 보낸다
            let mut framed = Framed::new(server_io, crate::gram::GramCodec::new());
            let success =
                WireValue::Structure(Response::Success(SuccessMessage::new()).to_structure());
            framed.send(success).await.unwrap();
            while let Some(Ok(_)) = framed.next().await {}
        });

        let channel = Channel::establish(client_io, 1, Address::new("testhost", 7787))
            .await
            .unwrap();

        // 액터가 프로토콜 위반을 감지하고 채널을 폐기할 때까지 대기
        let err = channel.request(Request::Reset).await.unwrap_err();
        assert!(matches!(
            err,
            DriverError::Protocol(_) | DriverError::Connection(_)
        ));
        assert!(channel.is_broken());
    }

    #[tokio::test]
    async fn test_close_gracefully_rejects_further_sends() {
        let channel = scripted_channel(GramVersion::V2_1, vec![], false).await;
        channel.close_gracefully();

        // Shutdown 이후 전송은 실패
        let result = channel.request(Request::Reset).await;
        assert!(result.is_err());
    }
}
