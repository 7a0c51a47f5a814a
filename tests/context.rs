use mini_resp::reader::DEFAULT_MAX_ELEMENTS;
use mini_resp::{Arg, Context, ErrorKind, Reply, State, Transport};

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// 按脚本返回数据的内存传输
#[derive(Default)]
struct Script {
    // 每次读取依次返回的数据；为空时返回 `WouldBlock`
    reads: VecDeque<Result<Vec<u8>, io::ErrorKind>>,
    written: Vec<u8>,
    // 每次写入最多接受的字节数
    write_limit: Option<usize>,
    read_calls: usize,
    write_calls: usize,
    timeout: Option<Duration>,
    closed: bool,
}

#[derive(Clone, Default)]
struct Mock(Arc<Mutex<Script>>);

impl Mock {
    fn reply(&self, bytes: &[u8]) {
        self.0.lock().unwrap().reads.push_back(Ok(bytes.to_vec()));
    }

    fn fail(&self, kind: io::ErrorKind) {
        self.0.lock().unwrap().reads.push_back(Err(kind));
    }

    fn written(&self) -> Vec<u8> {
        self.0.lock().unwrap().written.clone()
    }

    fn calls(&self) -> (usize, usize) {
        let script = self.0.lock().unwrap();
        (script.read_calls, script.write_calls)
    }
}

impl Transport for Mock {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut script = self.0.lock().unwrap();
        script.read_calls += 1;

        match script.reads.pop_front() {
            Some(Ok(mut chunk)) => {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                if n < chunk.len() {
                    script.reads.push_front(Ok(chunk.split_off(n)));
                }
                Ok(n)
            }
            Some(Err(kind)) => Err(kind.into()),
            None => Err(io::ErrorKind::WouldBlock.into()),
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut script = self.0.lock().unwrap();
        script.write_calls += 1;

        let n = script.write_limit.unwrap_or(buf.len()).min(buf.len());
        script.written.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn close(&mut self) -> io::Result<()> {
        self.0.lock().unwrap().closed = true;
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.0.lock().unwrap().timeout = timeout;
        Ok(())
    }
}

fn blocking() -> (Context, Mock) {
    let mock = Mock::default();
    (Context::with_transport(mock.clone(), true), mock)
}

fn nonblocking() -> (Context, Mock) {
    let mock = Mock::default();
    (Context::with_transport(mock.clone(), false), mock)
}

#[test]
fn command_round_trip() {
    let (mut ctx, mock) = blocking();
    mock.reply(b"+OK\r\n");

    let reply = ctx
        .command("SET %s %s", &["foo".into(), "bar".into()])
        .unwrap()
        .unwrap();
    assert_eq!(reply, Reply::Status("OK".into()));
    assert_eq!(
        mock.written(),
        b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n".to_vec()
    );
    assert_eq!(ctx.state(), State::Connected);
    assert!(ctx.check_connect_done().unwrap());
}

#[test]
fn pipelined_replies_come_back_in_order() {
    let (mut ctx, mock) = blocking();
    ctx.append_command("PING", &[]).unwrap();
    ctx.append_command("ECHO %s", &["foo".into()]).unwrap();
    ctx.append_command_argv(&["INCR", "n"], None).unwrap();

    // 全部回复在一次读取中到达
    mock.reply(b"+PONG\r\n$3\r\nfoo\r\n:1\r\n");

    assert_eq!(ctx.get_reply().unwrap().unwrap(), "PONG");
    assert_eq!(ctx.get_reply().unwrap().unwrap(), "foo");
    assert_eq!(ctx.get_reply().unwrap().unwrap(), Reply::Integer(1));
    assert_eq!(mock.calls(), (1, 1));
}

#[test]
fn push_handler_takes_push_messages() {
    let (mut ctx, mock) = blocking();
    let pushes = Arc::new(Mutex::new(Vec::new()));
    let sink = pushes.clone();
    assert!(ctx
        .set_push_handler(move |reply| sink.lock().unwrap().push(reply))
        .is_none());

    mock.reply(b"+OK\r\n>2\r\n$7\r\nmessage\r\n$2\r\nhi\r\n:1\r\n");

    assert_eq!(ctx.get_reply().unwrap().unwrap(), "OK");
    assert_eq!(ctx.get_reply().unwrap().unwrap(), Reply::Integer(1));

    let pushes = pushes.lock().unwrap();
    assert_eq!(pushes.len(), 1);
    assert!(pushes[0].is_push());
    assert_eq!(pushes[0].elements()[1], "hi");
}

#[test]
fn push_messages_are_in_band_without_a_handler() {
    let (mut ctx, mock) = blocking();
    mock.reply(b"+OK\r\n>1\r\n$4\r\nping\r\n:1\r\n");

    assert_eq!(ctx.get_reply().unwrap().unwrap(), "OK");
    let push = ctx.get_reply().unwrap().unwrap();
    assert!(push.is_push());
    assert_eq!(ctx.get_reply().unwrap().unwrap(), Reply::Integer(1));
}

#[test]
fn cleared_handler_returns_push_in_band() {
    let (mut ctx, mock) = blocking();
    ctx.set_push_handler(|_| {});
    assert!(ctx.clear_push_handler().is_some());

    mock.reply(b">1\r\n+x\r\n");
    assert!(ctx.get_reply().unwrap().unwrap().is_push());
}

#[test]
fn reply_split_across_reads() {
    let (mut ctx, mock) = blocking();
    mock.reply(b"*2\r\n$5\r\nhel");
    mock.reply(b"lo\r\n:4");
    mock.reply(b"2\r");
    mock.reply(b"\n");

    let reply = ctx.get_reply().unwrap().unwrap();
    assert_eq!(reply.elements()[0], "hello");
    assert_eq!(reply.elements()[1], Reply::Integer(42));
    assert_eq!(mock.calls().0, 4);
}

#[test]
fn interrupted_read_is_retried() {
    let (mut ctx, mock) = blocking();
    mock.fail(io::ErrorKind::Interrupted);
    mock.reply(b"+OK\r\n");

    assert_eq!(ctx.get_reply().unwrap().unwrap(), "OK");
    assert!(ctx.error().is_none());
}

#[test]
fn partial_writes_keep_the_tail() {
    let (mut ctx, mock) = nonblocking();
    mock.0.lock().unwrap().write_limit = Some(5);

    ctx.append_command("PING", &[]).unwrap();
    let encoded = b"*1\r\n$4\r\nPING\r\n";

    assert!(!ctx.buffer_write().unwrap());
    assert_eq!(ctx.pending_output(), &encoded[5..]);

    while !ctx.buffer_write().unwrap() {}
    assert!(ctx.pending_output().is_empty());
    assert_eq!(mock.written(), encoded.to_vec());
}

#[test]
fn blocking_get_reply_flushes_everything_first() {
    let (mut ctx, mock) = blocking();
    mock.0.lock().unwrap().write_limit = Some(3);
    ctx.append_command("ECHO %s", &["hello".into()]).unwrap();
    mock.reply(b"$5\r\nhello\r\n");

    assert_eq!(ctx.get_reply().unwrap().unwrap(), "hello");
    assert_eq!(mock.written(), b"*2\r\n$4\r\nECHO\r\n$5\r\nhello\r\n".to_vec());
}

#[test]
fn nonblocking_get_reply_does_no_io() {
    let (mut ctx, mock) = nonblocking();
    assert_eq!(ctx.command("PING", &[]).unwrap(), None);
    assert_eq!(ctx.get_reply().unwrap(), None);
    assert_eq!(mock.calls(), (0, 0));

    assert!(ctx.buffer_write().unwrap());

    // 没有数据可读时不是错误
    ctx.buffer_read().unwrap();
    assert_eq!(ctx.get_reply().unwrap(), None);

    mock.reply(b"+PONG\r\n");
    ctx.buffer_read().unwrap();
    assert_eq!(ctx.get_reply().unwrap().unwrap(), "PONG");
    assert_eq!(mock.calls(), (2, 1));
}

#[test]
fn eof_latches_an_io_error() {
    let (mut ctx, mock) = blocking();
    mock.reply(b"");

    let err = ctx.command("PING", &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
    assert_eq!(err.message(), "Server closed the connection");
    assert_eq!(ctx.state(), State::Error);

    // 之后的请求直接失败，不触碰传输
    let calls = mock.calls();
    assert_eq!(ctx.command("PING", &[]).unwrap_err(), err);
    assert_eq!(ctx.append_formatted_command(b"PING\r\n").unwrap_err(), err);
    assert_eq!(ctx.buffer_write().unwrap_err(), err);
    assert_eq!(mock.calls(), calls);
    assert_eq!(ctx.error(), Some(&err));
}

#[test]
fn blocking_read_timeout() {
    let (mut ctx, _mock) = blocking();

    let err = ctx.command("GET %s", &["foo".into()]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(err.message(), "recv timeout");
}

#[test]
fn transport_errors_keep_their_message() {
    let (mut ctx, mock) = blocking();
    mock.fail(io::ErrorKind::ConnectionReset);

    let err = ctx.get_reply().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
    assert!(!err.message().is_empty());
}

#[test]
fn protocol_error_is_copied_to_the_context() {
    let (mut ctx, mock) = blocking();
    mock.reply(b"@oops\r\n");

    let err = ctx.get_reply().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Protocol);
    assert_eq!(err.message(), "Protocol error, got \"@\" as reply type byte");
    assert_eq!(ctx.error(), Some(&err));
    assert_eq!(ctx.reader().error(), Some(&err));
    assert_eq!(ctx.get_reply().unwrap_err(), err);
}

#[test]
fn format_errors_are_reported() {
    let (mut ctx, _mock) = blocking();

    let err = ctx.append_command("GET %lf", &[1.5f64.into()]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Format);
    assert_eq!(err.message(), "Invalid format string");
    assert!(ctx.pending_output().is_empty());
}

#[test]
fn formatted_commands_are_sent_verbatim() {
    let (mut ctx, mock) = nonblocking();
    ctx.append_formatted_command(b"*1\r\n$4\r\nPING\r\n").unwrap();
    ctx.append_command("ECHO %b", &[Arg::Bytes(b"a\0b")]).unwrap();
    while !ctx.buffer_write().unwrap() {}

    assert_eq!(
        mock.written(),
        b"*1\r\n$4\r\nPING\r\n*2\r\n$4\r\nECHO\r\n$3\r\na\0b\r\n".to_vec()
    );
}

#[test]
fn reconnect_needs_an_endpoint() {
    let (mut ctx, mock) = blocking();
    mock.reply(b"");
    ctx.get_reply().unwrap_err();

    let err = ctx.reconnect().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Other);
    assert_eq!(err.message(), "Not enough information to reconnect");
    assert_eq!(ctx.error(), Some(&err));

    // 旧的传输已经关闭
    assert!(mock.0.lock().unwrap().closed);
}

#[test]
fn timeouts() {
    let (mut ctx, mock) = blocking();
    ctx.set_timeout(Duration::from_millis(10)).unwrap();
    assert_eq!(mock.0.lock().unwrap().timeout, Some(Duration::from_millis(10)));
    assert_eq!(ctx.options().command_timeout, Some(Duration::from_millis(10)));

    let (mut ctx, _mock) = nonblocking();
    let err = ctx.set_timeout(Duration::from_millis(10)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Other);
    assert_eq!(err.message(), "Timeouts can only be set on blocking contexts");
    assert!(ctx.error().is_none());
}

#[test]
fn unsupported_socket_options_latch_an_error() {
    let (mut ctx, _mock) = blocking();
    let err = ctx.enable_keepalive().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
    assert_eq!(ctx.state(), State::Error);
}

#[test]
fn drop_closes_the_transport() {
    let (ctx, mock) = blocking();
    drop(ctx);
    assert!(mock.0.lock().unwrap().closed);
}

#[test]
fn into_transport_keeps_it_open() {
    let (ctx, mock) = blocking();
    let transport = ctx.into_transport();
    assert!(transport.is_some());
    assert!(!mock.0.lock().unwrap().closed);
}

#[test]
fn reader_limits_default() {
    let (mut ctx, mock) = blocking();
    assert_eq!(ctx.reader().max_elements(), DEFAULT_MAX_ELEMENTS);

    ctx.reader_mut().set_max_elements(2);
    mock.reply(b"*3\r\n");
    let err = ctx.get_reply().unwrap_err();
    assert_eq!(err.message(), "Multi-bulk length out of range");
}
