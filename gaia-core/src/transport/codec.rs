use bytes::Buf as _;
use prost::Message as _;

/// Protobuf codec for reflection-driven messages.
///
/// Encoding needs nothing but the message itself; decoding needs the descriptor of the
/// message expected on the wire (the response on a client, the request on a server).
#[derive(Clone)]
pub(crate) struct DynamicMessageCodec {
    decode_desc: prost_reflect::MessageDescriptor,
}

impl DynamicMessageCodec {
    pub(crate) fn new(decode_desc: prost_reflect::MessageDescriptor) -> Self {
        Self { decode_desc }
    }
}

impl tonic::codec::Codec for DynamicMessageCodec {
    type Encode = prost_reflect::DynamicMessage;
    type Decode = prost_reflect::DynamicMessage;
    type Encoder = DynamicMessageEncoder;
    type Decoder = DynamicMessageDecoder;

    fn encoder(&mut self) -> Self::Encoder {
        DynamicMessageEncoder
    }

    fn decoder(&mut self) -> Self::Decoder {
        DynamicMessageDecoder {
            desc: self.decode_desc.clone(),
        }
    }
}

#[derive(Clone)]
pub(crate) struct DynamicMessageEncoder;

impl tonic::codec::Encoder for DynamicMessageEncoder {
    type Item = prost_reflect::DynamicMessage;
    type Error = tonic::Status;

    fn encode(
        &mut self,
        item: Self::Item,
        dst: &mut tonic::codec::EncodeBuf<'_>,
    ) -> std::result::Result<(), Self::Error> {
        item.encode(dst)
            .map_err(|e| tonic::Status::internal(e.to_string()))?;
        Ok(())
    }
}

#[derive(Clone)]
pub(crate) struct DynamicMessageDecoder {
    desc: prost_reflect::MessageDescriptor,
}

impl tonic::codec::Decoder for DynamicMessageDecoder {
    type Item = prost_reflect::DynamicMessage;
    type Error = tonic::Status;

    fn decode(
        &mut self,
        src: &mut tonic::codec::DecodeBuf<'_>,
    ) -> std::result::Result<Option<Self::Item>, Self::Error> {
        // An empty frame is a message with every field at its default.
        if !src.has_remaining() {
            return Ok(Some(prost_reflect::DynamicMessage::new(self.desc.clone())));
        }

        let msg = prost_reflect::DynamicMessage::decode(self.desc.clone(), &mut *src)
            .map_err(|e| tonic::Status::internal(e.to_string()))?;

        Ok(Some(msg))
    }
}
