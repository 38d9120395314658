//! Protobuf descriptor fixtures for the gaia test suites.
//!
//! The fixtures are assembled from `prost_types` descriptor protos, so tests do not
//! need a `protoc` binary on the machine running them.

use prost::Message as _;
use prost_reflect::DescriptorPool;
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{
    DescriptorProto, FieldDescriptorProto, FileDescriptorProto, FileDescriptorSet,
    MethodDescriptorProto, ServiceDescriptorProto,
};

pub const GREETER_SERVICE: &str = "helloworld.Greeter";

fn string_field(name: &str, number: i32) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.to_string()),
        number: Some(number),
        label: Some(Label::Optional as i32),
        r#type: Some(Type::String as i32),
        json_name: Some(name.to_string()),
        ..Default::default()
    }
}

fn int32_field(name: &str, number: i32) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.to_string()),
        number: Some(number),
        label: Some(Label::Optional as i32),
        r#type: Some(Type::Int32 as i32),
        json_name: Some(name.to_string()),
        ..Default::default()
    }
}

fn message(name: &str, fields: Vec<FieldDescriptorProto>) -> DescriptorProto {
    DescriptorProto {
        name: Some(name.to_string()),
        field: fields,
        ..Default::default()
    }
}

fn unary(name: &str, input: &str, output: &str) -> MethodDescriptorProto {
    MethodDescriptorProto {
        name: Some(name.to_string()),
        input_type: Some(input.to_string()),
        output_type: Some(output.to_string()),
        ..Default::default()
    }
}

fn service(name: &str, methods: Vec<MethodDescriptorProto>) -> ServiceDescriptorProto {
    ServiceDescriptorProto {
        name: Some(name.to_string()),
        method: methods,
        ..Default::default()
    }
}

fn file(
    name: &str,
    package: Option<&str>,
    messages: Vec<DescriptorProto>,
    services: Vec<ServiceDescriptorProto>,
) -> FileDescriptorProto {
    FileDescriptorProto {
        name: Some(name.to_string()),
        package: package.map(str::to_string),
        message_type: messages,
        service: services,
        syntax: Some("proto3".to_string()),
        ..Default::default()
    }
}

/// `helloworld.proto`:
///
/// ```proto
/// package helloworld;
///
/// service Greeter {
///   rpc SayHello (HelloRequest) returns (HelloReply);
///   rpc ping (HelloRequest) returns (HelloReply);
///   rpc CountLetters (HelloRequest) returns (LetterCount);
/// }
/// ```
#[must_use]
pub fn greeter_file() -> FileDescriptorProto {
    file(
        "helloworld.proto",
        Some("helloworld"),
        vec![
            message("HelloRequest", vec![string_field("name", 1)]),
            message("HelloReply", vec![string_field("greeting", 1)]),
            message("LetterCount", vec![int32_field("letters", 1)]),
        ],
        vec![service(
            "Greeter",
            vec![
                unary(
                    "SayHello",
                    ".helloworld.HelloRequest",
                    ".helloworld.HelloReply",
                ),
                unary("ping", ".helloworld.HelloRequest", ".helloworld.HelloReply"),
                unary(
                    "CountLetters",
                    ".helloworld.HelloRequest",
                    ".helloworld.LetterCount",
                ),
            ],
        )],
    )
}

#[must_use]
pub fn greeter_set() -> FileDescriptorSet {
    FileDescriptorSet {
        file: vec![greeter_file()],
    }
}

/// Two files with services, plus a package-less third file:
///
/// - `alpha.proto` (`demo.alpha`): `Inventory { GetItem, ListItems }`, `Idle {}`
/// - `beta.proto` (`demo.beta`): `Billing { Charge }`
/// - `health.proto` (no package): `Health { Check }`
#[must_use]
pub fn catalog_set() -> FileDescriptorSet {
    let empty = || message("Empty", Vec::new());

    let alpha = file(
        "alpha.proto",
        Some("demo.alpha"),
        vec![empty()],
        vec![
            service(
                "Inventory",
                vec![
                    unary("GetItem", ".demo.alpha.Empty", ".demo.alpha.Empty"),
                    unary("ListItems", ".demo.alpha.Empty", ".demo.alpha.Empty"),
                ],
            ),
            service("Idle", Vec::new()),
        ],
    );

    let beta = file(
        "beta.proto",
        Some("demo.beta"),
        vec![empty()],
        vec![service(
            "Billing",
            vec![unary("Charge", ".demo.beta.Empty", ".demo.beta.Empty")],
        )],
    );

    let health = file(
        "health.proto",
        None,
        vec![empty()],
        vec![service("Health", vec![unary("Check", ".Empty", ".Empty")])],
    );

    FileDescriptorSet {
        file: vec![alpha, beta, health],
    }
}

/// `stream.proto` (`demo.stream`): `Ticker { Subscribe }` where `Subscribe` is
/// server-streaming.
#[must_use]
pub fn streaming_set() -> FileDescriptorSet {
    let mut subscribe = unary("Subscribe", ".demo.stream.Tick", ".demo.stream.Tick");
    subscribe.server_streaming = Some(true);

    FileDescriptorSet {
        file: vec![file(
            "stream.proto",
            Some("demo.stream"),
            vec![message("Tick", vec![int32_field("seq", 1)])],
            vec![service("Ticker", vec![subscribe])],
        )],
    }
}

/// A file with no services at all.
#[must_use]
pub fn messages_only_set() -> FileDescriptorSet {
    FileDescriptorSet {
        file: vec![file(
            "types.proto",
            Some("demo.types"),
            vec![message("Unit", Vec::new())],
            Vec::new(),
        )],
    }
}

#[must_use]
pub fn encode_set(set: &FileDescriptorSet) -> Vec<u8> {
    set.encode_to_vec()
}

pub fn pool(set: FileDescriptorSet) -> Result<DescriptorPool, prost_reflect::DescriptorError> {
    DescriptorPool::from_file_descriptor_set(set)
}
