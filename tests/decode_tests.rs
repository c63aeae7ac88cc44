// Wire-format tests for the OSC decoder.
//
// rosc is used here purely as an independent encoder: it produces the
// well-formed OSC 1.0 byte sequences that our decoder must accept, which
// keeps these tests honest about the wire format instead of checking the
// decoder against itself. Byte-level malformed-input cases live next to the
// decoder in src/osc/decode.rs.

use assert2::{assert, check};
use float_cmp::approx_eq;
use rosc::{OscPacket, OscTime, OscType};

use osc_monitor::osc::{DecodeErrorKind, OscArg, decode};

fn encode(addr: &str, args: Vec<OscType>) -> Vec<u8> {
    rosc::encoder::encode(&OscPacket::Message(rosc::OscMessage {
        addr: addr.to_string(),
        args,
    }))
    .expect("rosc should encode a well-formed message")
}

/// What our decoder must produce for a given generator argument.
fn expected(arg: &OscType) -> OscArg {
    match arg {
        OscType::Int(v) => OscArg::Int(*v),
        OscType::Float(v) => OscArg::Float(*v),
        OscType::String(v) => OscArg::Str(v.clone()),
        OscType::Blob(v) => OscArg::Blob(v.clone()),
        OscType::Bool(v) => OscArg::Bool(*v),
        OscType::Time(t) => OscArg::Time(((t.seconds as u64) << 32) | t.fractional as u64),
        OscType::Nil => OscArg::Nil,
        other => panic!("generator produced an argument outside the supported set: {:?}", other),
    }
}

/// Address/argument pairs covering every supported tag, alone and combined.
fn generator_corpus() -> Vec<(&'static str, Vec<OscType>)> {
    vec![
        ("/", vec![]),
        ("/synth/freq", vec![OscType::Float(440.0)]),
        ("/mixer/track/3/volume", vec![OscType::Int(-7)]),
        ("/label", vec![OscType::String("hello world".to_string())]),
        ("/s/empty", vec![OscType::String(String::new())]),
        ("/raw", vec![OscType::Blob(vec![0xde, 0xad, 0xbe, 0xef, 0x01])]),
        ("/raw/empty", vec![OscType::Blob(vec![])]),
        ("/gate", vec![OscType::Bool(true), OscType::Bool(false)]),
        ("/none", vec![OscType::Nil]),
        (
            "/clock",
            vec![OscType::Time(OscTime {
                seconds: 0x8399_2e80,
                fractional: 42,
            })],
        ),
        (
            "/everything",
            vec![
                OscType::Int(i32::MIN),
                OscType::Float(-0.0),
                OscType::String("padding sizes 1".to_string()),
                OscType::Blob(vec![1, 2, 3]),
                OscType::Bool(true),
                OscType::Time(OscTime {
                    seconds: 1,
                    fractional: 2,
                }),
                OscType::Nil,
                OscType::Int(0),
            ],
        ),
    ]
}

#[test]
fn decodes_the_reference_example() {
    // /test/1 with (42: int32, 3.5: float32)
    let bytes = encode("/test/1", vec![OscType::Int(42), OscType::Float(3.5)]);
    let msg = decode(&bytes).expect("reference message should decode");

    assert!(msg.addr == "/test/1");
    assert!(msg.args.len() == 2);
    check!(msg.args[0] == OscArg::Int(42));
    let OscArg::Float(f) = msg.args[1] else {
        panic!("second argument should be a float, got {:?}", msg.args[1]);
    };
    check!(approx_eq!(f32, f, 3.5, epsilon = f32::EPSILON));
}

#[test]
fn round_trip_law_holds_for_the_generator_corpus() {
    for (addr, args) in generator_corpus() {
        let bytes = encode(addr, args.clone());
        let msg = decode(&bytes)
            .unwrap_or_else(|err| panic!("{} should decode, got {}", addr, err));

        check!(msg.addr == addr, "address must survive the round trip");
        let want: Vec<OscArg> = args.iter().map(expected).collect();
        check!(msg.args == want, "arguments for {} must survive the round trip", addr);
    }
}

#[test]
fn every_strict_prefix_of_a_valid_message_errors() {
    for (addr, args) in generator_corpus() {
        let bytes = encode(addr, args);
        for cut in 0..bytes.len() {
            let result = decode(&bytes[..cut]);
            check!(
                result.is_err(),
                "a {}-byte prefix of the {}-byte encoding of {} must not decode",
                cut,
                bytes.len(),
                addr
            );
        }
    }
}

#[test]
fn decode_is_deterministic() {
    let valid = encode("/determinism", vec![OscType::Int(1), OscType::Float(2.0)]);
    let malformed = b"not osc at all".to_vec();

    assert!(decode(&valid) == decode(&valid));
    assert!(decode(&malformed) == decode(&malformed));
}

#[test]
fn bundles_are_rejected_as_unsupported() {
    let bundle = OscPacket::Bundle(rosc::OscBundle {
        timetag: OscTime {
            seconds: 0,
            fractional: 1,
        },
        content: vec![OscPacket::Message(rosc::OscMessage {
            addr: "/inside".to_string(),
            args: vec![OscType::Int(1)],
        })],
    });
    let bytes = rosc::encoder::encode(&bundle).expect("rosc should encode a bundle");

    let err = decode(&bytes).expect_err("bundles are out of scope and must not decode");
    assert!(err.kind == DecodeErrorKind::UnknownTypeTag('#'));
}

#[test]
fn decode_errors_keep_the_raw_datagram() {
    let bytes = encode("/trunc", vec![OscType::Int(9)]);
    let cut = &bytes[..bytes.len() - 2];

    let err = decode(cut).expect_err("a truncated message must not decode");
    assert!(err.kind == DecodeErrorKind::TruncatedPayload);
    assert!(err.data == cut);
}
