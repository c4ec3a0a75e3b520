use std::time::Duration;

use fz_serverd::auth::{AnyPassword, AvailableMethods, AuthMethod, Authenticator, MethodsSet, Store, User};
use fz_serverd::tvfs::NativeFormat;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

fn store_with_password_user() -> Store {
    let mut store = Store::default();
    let mut u = User { name: "alice".into(), enabled: true, ..Default::default() };
    u.credentials.password.password = Some(AnyPassword::default_password("hunter2"));
    u.methods = AvailableMethods::new([MethodsSet::from_methods([AuthMethod::Password])]);
    store.users.insert("alice".into(), u);
    store.sanitize();
    store
}

async fn read_line(reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>) -> String {
    let mut line = String::new();
    tokio::time::timeout(Duration::from_secs(5), reader.read_line(&mut line)).await.unwrap().unwrap();
    line
}

#[tokio::test]
async fn login_then_pwd_and_cwd_against_the_tvfs_engine() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let authenticator = Authenticator::new(store_with_password_user(), None, NativeFormat::Posix);

    tokio::spawn(fz_serverd::handle_forever(listener, authenticator, NativeFormat::Posix));

    let stream = TcpStream::connect(addr).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    assert!(read_line(&mut reader).await.starts_with("220"));

    write_half.write_all(b"USER alice\r\n").await.unwrap();
    assert!(read_line(&mut reader).await.starts_with("331"));

    write_half.write_all(b"PASS hunter2\r\n").await.unwrap();
    assert!(read_line(&mut reader).await.starts_with("230"));

    write_half.write_all(b"PWD\r\n").await.unwrap();
    let pwd = read_line(&mut reader).await;
    assert!(pwd.starts_with("257"));
    assert!(pwd.contains("/"));

    write_half.write_all(b"CWD /no-such-directory\r\n").await.unwrap();
    assert!(read_line(&mut reader).await.starts_with("550"));

    write_half.write_all(b"QUIT\r\n").await.unwrap();
    assert!(read_line(&mut reader).await.starts_with("221"));
}

#[tokio::test]
async fn wrong_password_is_rejected_and_connection_stays_open() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let authenticator = Authenticator::new(store_with_password_user(), None, NativeFormat::Posix);

    tokio::spawn(fz_serverd::handle_forever(listener, authenticator, NativeFormat::Posix));

    let stream = TcpStream::connect(addr).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    read_line(&mut reader).await;

    write_half.write_all(b"USER alice\r\n").await.unwrap();
    read_line(&mut reader).await;

    write_half.write_all(b"PASS wrong\r\n").await.unwrap();
    assert!(read_line(&mut reader).await.starts_with("530"));

    write_half.write_all(b"QUIT\r\n").await.unwrap();
    assert!(read_line(&mut reader).await.starts_with("221"));
}
