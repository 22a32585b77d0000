use eddy::Buffer;

mod util;
use util::init;

#[test]
fn fresh_buffer_layout() {
    init();
    let buf = Buffer::new();
    assert_eq!(buf.readable_bytes(), 0);
    assert_eq!(buf.writable_bytes(), Buffer::INITIAL_SIZE);
    assert_eq!(buf.prependable_bytes(), Buffer::CHEAP_PREPEND);
}

#[test]
fn append_then_retrieve_moves_cursors() {
    init();
    let mut buf = Buffer::new();
    buf.append(&[b'x'; 200]);
    assert_eq!(buf.readable_bytes(), 200);
    assert_eq!(buf.writable_bytes(), Buffer::INITIAL_SIZE - 200);
    assert_eq!(buf.prependable_bytes(), Buffer::CHEAP_PREPEND);

    buf.retrieve(50);
    assert_eq!(buf.readable_bytes(), 150);
    assert_eq!(buf.prependable_bytes(), Buffer::CHEAP_PREPEND + 50);

    // Draining the rest collapses both cursors to the prepend base.
    buf.retrieve(150);
    assert_eq!(buf.readable_bytes(), 0);
    assert_eq!(buf.writable_bytes(), Buffer::INITIAL_SIZE);
    assert_eq!(buf.prependable_bytes(), Buffer::CHEAP_PREPEND);
}

#[test]
fn retrieve_all_then_append_starts_clean() {
    init();
    let mut buf = Buffer::new();
    buf.append(b"throwaway");
    buf.retrieve_all();

    buf.append(b"fresh content");
    assert_eq!(buf.peek(), b"fresh content");
    assert_eq!(buf.retrieve_all_as_bytes(), b"fresh content");
}

#[test]
fn appends_concatenate_in_order() {
    init();
    let mut buf = Buffer::new();
    buf.append(b"hello ");
    buf.append(b"world");
    assert_eq!(buf.retrieve_all_as_bytes(), b"hello world");
    assert_eq!(buf.readable_bytes(), 0);
}

#[test]
fn partial_retrieve_as_bytes() {
    init();
    let mut buf = Buffer::new();
    buf.append(b"abcdef");
    assert_eq!(buf.retrieve_as_bytes(3), b"abc");
    assert_eq!(buf.peek(), b"def");
}

#[test]
fn growth_beyond_initial_size() {
    init();
    let mut buf = Buffer::new();
    let big = vec![7u8; Buffer::INITIAL_SIZE * 3];
    buf.append(&big);
    assert_eq!(buf.readable_bytes(), big.len());
    assert_eq!(buf.retrieve_all_as_bytes(), big);
}

#[test]
fn append_compacts_instead_of_growing_when_front_is_free() {
    init();
    let mut buf = Buffer::new();
    buf.append(&vec![1u8; Buffer::INITIAL_SIZE]);
    // Free the front, then ask for more than the tail has left; the
    // content slides back instead of the storage growing.
    buf.retrieve(900);
    buf.append(&vec![2u8; 800]);

    assert_eq!(buf.readable_bytes(), Buffer::INITIAL_SIZE - 900 + 800);
    assert_eq!(buf.prependable_bytes(), Buffer::CHEAP_PREPEND);

    let bytes = buf.retrieve_all_as_bytes();
    assert!(bytes[..Buffer::INITIAL_SIZE - 900].iter().all(|&b| b == 1));
    assert!(bytes[Buffer::INITIAL_SIZE - 900..].iter().all(|&b| b == 2));
}

#[test]
fn prepend_uses_the_headroom() {
    init();
    let mut buf = Buffer::new();
    buf.append(b"payload");
    buf.prepend(&(7u32.to_be_bytes()));
    assert_eq!(buf.prependable_bytes(), Buffer::CHEAP_PREPEND - 4);
    assert_eq!(buf.readable_bytes(), 11);
    assert_eq!(&buf.retrieve_all_as_bytes()[4..], b"payload");
}

#[test]
fn retrieve_more_than_readable_drains() {
    init();
    let mut buf = Buffer::new();
    buf.append(b"abc");
    buf.retrieve(64);
    assert_eq!(buf.readable_bytes(), 0);
    assert_eq!(buf.prependable_bytes(), Buffer::CHEAP_PREPEND);
}
