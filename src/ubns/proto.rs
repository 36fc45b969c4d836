//! Wire types and client stub for `ubns.v1.UBNSService`.
//!
//! Kept in the shape `tonic-build` emits so the naming authority's proto
//! file stays the source of truth for field numbers.

/// Lifecycle status of a bucket naming entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum BucketEntryStatus {
    Unspecified = 0,
    Created = 1,
    Deleting = 2,
}

impl BucketEntryStatus {
    /// Protobuf enum value name.
    pub fn as_str_name(&self) -> &'static str {
        match self {
            BucketEntryStatus::Unspecified => "BUCKET_ENTRY_STATUS_UNSPECIFIED",
            BucketEntryStatus::Created => "BUCKET_ENTRY_STATUS_CREATED",
            BucketEntryStatus::Deleting => "BUCKET_ENTRY_STATUS_DELETING",
        }
    }
}

/// Reserve `bucket` for `owner` on `cluster_id`.
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AddBucketEntryRequest {
    #[prost(string, tag = "1")]
    pub bucket: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub cluster_id: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub owner: ::prost::alloc::string::String,
}

#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AddBucketEntryResponse {}

/// Release `bucket`, which must be held by `cluster_id`.
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteBucketEntryRequest {
    #[prost(string, tag = "1")]
    pub bucket: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub cluster_id: ::prost::alloc::string::String,
}

#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteBucketEntryResponse {}

/// Move `bucket` to a new lifecycle status.
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdateBucketEntryRequest {
    #[prost(string, tag = "1")]
    pub bucket: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub cluster_id: ::prost::alloc::string::String,
    #[prost(enumeration = "BucketEntryStatus", tag = "3")]
    pub status: i32,
}

#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdateBucketEntryResponse {}

pub mod ubns_service_client {
    use tonic::codegen::http::uri::PathAndQuery;
    use tonic::transport::Channel;

    const SERVICE: &str = "ubns.v1.UBNSService";

    /// Unary client for the naming authority.
    #[derive(Debug, Clone)]
    pub struct UbnsServiceClient {
        inner: tonic::client::Grpc<Channel>,
    }

    impl UbnsServiceClient {
        pub fn new(channel: Channel) -> Self {
            Self {
                inner: tonic::client::Grpc::new(channel),
            }
        }

        pub async fn add_bucket_entry(
            &mut self,
            request: impl tonic::IntoRequest<super::AddBucketEntryRequest>,
        ) -> Result<tonic::Response<super::AddBucketEntryResponse>, tonic::Status> {
            self.ready().await?;
            let codec = tonic::codec::ProstCodec::default();
            let path = PathAndQuery::from_static("/ubns.v1.UBNSService/AddBucketEntry");
            let mut req = request.into_request();
            req.extensions_mut()
                .insert(tonic::GrpcMethod::new(SERVICE, "AddBucketEntry"));
            self.inner.unary(req, path, codec).await
        }

        pub async fn delete_bucket_entry(
            &mut self,
            request: impl tonic::IntoRequest<super::DeleteBucketEntryRequest>,
        ) -> Result<tonic::Response<super::DeleteBucketEntryResponse>, tonic::Status> {
            self.ready().await?;
            let codec = tonic::codec::ProstCodec::default();
            let path = PathAndQuery::from_static("/ubns.v1.UBNSService/DeleteBucketEntry");
            let mut req = request.into_request();
            req.extensions_mut()
                .insert(tonic::GrpcMethod::new(SERVICE, "DeleteBucketEntry"));
            self.inner.unary(req, path, codec).await
        }

        pub async fn update_bucket_entry(
            &mut self,
            request: impl tonic::IntoRequest<super::UpdateBucketEntryRequest>,
        ) -> Result<tonic::Response<super::UpdateBucketEntryResponse>, tonic::Status> {
            self.ready().await?;
            let codec = tonic::codec::ProstCodec::default();
            let path = PathAndQuery::from_static("/ubns.v1.UBNSService/UpdateBucketEntry");
            let mut req = request.into_request();
            req.extensions_mut()
                .insert(tonic::GrpcMethod::new(SERVICE, "UpdateBucketEntry"));
            self.inner.unary(req, path, codec).await
        }

        async fn ready(&mut self) -> Result<(), tonic::Status> {
            self.inner
                .ready()
                .await
                .map_err(|e| tonic::Status::unavailable(format!("Service was not ready: {e}")))
        }
    }
}
