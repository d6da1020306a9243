use std::{thread, time::Duration};

use chrono::Utc;
use mempipe::{
    Conn, Decoder, MAX_PAYLOAD, Msg, MsgReader, MsgWriter, Pipe, PipeError, clear_pipe,
};
use mempipe_shm::{AttachFlags, SharedMem, ShmFlags};
use rand::Rng;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

const BENCH_PAYLOAD: &[u8] = b"test interprocess message x1234567890";

fn fresh_segment(key: i64, size: u64) -> SharedMem {
    clear_pipe(key);
    SharedMem::get(key, size, &ShmFlags { create: true, exclusive: true, perms: 0o600 })
        .expect("shmget")
}

/// Writer and reader pipes over one segment, already marked for
/// destruction.
fn pipe_pair(key: i64, size: u64) -> (Pipe, Pipe) {
    let mem = fresh_segment(key, size);
    let writer_view = mem.attach(&AttachFlags::default()).unwrap();
    let reader_view = mem.attach(&AttachFlags::default()).unwrap();
    mem.remove().unwrap();
    (
        Pipe::from_conn(Conn::new(mem, writer_view).unwrap()),
        Pipe::from_conn(Conn::new(mem, reader_view).unwrap()),
    )
}

#[test]
fn pipe_roundtrip() {
    let (writer, reader) = pipe_pair(0xE4F0, 10 * 1024);

    let mut chunk = vec![0u8; 1024];
    rand::rng().fill(chunk.as_mut_slice());
    let payload: Vec<u8> = chunk.repeat(10);

    for _ in 0..100 {
        let src = Msg::new(10, payload.clone());
        writer.write_msg(&src).expect("write msg");

        let msg = reader.read_msg().expect("read msg");
        assert_eq!(msg.code, src.code);
        assert_eq!(msg.size as usize, payload.len());
        assert_eq!(msg.payload, src.payload);
    }
}

#[test]
fn end_to_end_create_open_exchange() {
    const KEY: i64 = 0xE4F1;
    const ITERATIONS: usize = 1000;

    clear_pipe(KEY);
    let producer = Pipe::create_writer(KEY, 2048).expect("create writer");
    let consumer = Pipe::open_reader(KEY, 2048).expect("open reader");

    // The consumer is attached, so this refreshes the attach cache and
    // returns at once.
    producer.wait_conn().expect("wait conn");

    let recv = thread::spawn(move || {
        for _ in 0..ITERATIONS {
            let msg = consumer.read_msg().expect("read msg");
            assert_eq!(msg.code, 1);
            assert_eq!(msg.payload, BENCH_PAYLOAD);
            let age = Utc::now().signed_duration_since(msg.time());
            assert!(age.num_seconds() < 5, "stale receive timestamp");
        }
    });

    for _ in 0..ITERATIONS {
        producer.write_msg(&Msg::new(1, BENCH_PAYLOAD.to_vec())).expect("write msg");
    }

    recv.join().unwrap();
}

#[test]
fn deadlines_reach_their_own_paths() {
    let (writer, reader) = pipe_pair(0xE4F2, 4096);

    reader.set_read_deadline(Some(Duration::from_millis(100)));
    assert!(matches!(reader.read_msg(), Err(PipeError::ReadTimedout)));

    writer.write_msg(&Msg::new(1, b"one".to_vec())).unwrap();
    writer.set_write_deadline(Some(Duration::from_millis(100)));
    // Nobody acknowledged the first frame yet.
    assert!(matches!(
        writer.write_msg(&Msg::new(1, b"two".to_vec())),
        Err(PipeError::WriteTimedout)
    ));

    // And the read deadline did not break the read path for good.
    let msg = reader.read_msg().unwrap();
    assert_eq!(msg.payload, b"one");
}

#[test]
fn read_pipe_rejects_writes() {
    let mem = fresh_segment(0xE4F3, 4096);
    let pipe = Pipe::from_conn(Conn::read_only(mem).unwrap());
    mem.remove().unwrap();

    assert!(matches!(
        pipe.write_msg(&Msg::new(5, b"no".to_vec())),
        Err(PipeError::ReadOnly)
    ));

    // Size is vetted before the role.
    assert!(matches!(
        pipe.write_msg(&Msg::new(5, vec![0u8; MAX_PAYLOAD + 1])),
        Err(PipeError::MessageTooLarge)
    ));
}

#[test]
fn close_disables_both_paths() {
    let mem = fresh_segment(0xE4F4, 4096);
    let pipe = Pipe::from_conn(Conn::write_only(mem).unwrap());
    mem.remove().unwrap();

    pipe.close();
    assert!(matches!(pipe.write_msg(&Msg::new(1, Vec::new())), Err(PipeError::Closed)));
    assert!(matches!(pipe.read_msg(), Err(PipeError::Closed)));
}

#[test]
fn clear_pipe_recovers_orphaned_segment() {
    const KEY: i64 = 0xE4F5;

    clear_pipe(KEY);
    let orphan = Pipe::create_writer(KEY, 1024).expect("create writer");
    // Producer "crashes": the pipe goes away without removing the
    // segment, and re-creation is blocked by the exclusive flag.
    drop(orphan);
    assert!(Pipe::create_writer(KEY, 1024).is_err());

    clear_pipe(KEY);
    let recovered = Pipe::create_writer(KEY, 1024).expect("create writer after clear");
    drop(recovered);
    clear_pipe(KEY);
}

#[derive(Serialize, Deserialize)]
struct TsFrame {
    ts: i64,
    id: usize,
}

struct JsonDecoder<T> {
    value: Option<T>,
}

impl<T: DeserializeOwned> Decoder for JsonDecoder<T> {
    type Error = serde_json::Error;

    fn decode(&mut self, payload: &[u8]) -> Result<(), Self::Error> {
        self.value = Some(serde_json::from_slice(payload)?);
        Ok(())
    }
}

#[test]
fn json_msgs_through_decoder() {
    const ITERATIONS: usize = 512;

    let (writer, reader) = pipe_pair(0xE4F6, 4096);

    let send = thread::spawn(move || {
        for i in 0..ITERATIONS {
            let frame =
                TsFrame { ts: Utc::now().timestamp_nanos_opt().unwrap_or_default(), id: i };
            let msg = Msg::new(100, serde_json::to_vec(&frame).unwrap());
            writer.write_msg(&msg).expect("write msg");
        }
    });

    for i in 0..ITERATIONS {
        let msg = reader.read_msg().expect("read msg");
        assert_eq!(msg.code, 100);

        let mut decoder = JsonDecoder::<TsFrame> { value: None };
        msg.decode(&mut decoder).expect("decode");
        let frame = decoder.value.expect("decoded frame");
        assert_eq!(frame.id, i, "frames out of order");
        assert!(frame.ts > 0);
    }

    send.join().unwrap();
}
