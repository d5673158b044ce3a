#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct Sum {
    #[prost(int32, tag = "1")]
    pub sum1: i32,
    #[prost(int32, tag = "2")]
    pub sum2: i32,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct SumRequest {
    #[prost(message, optional, tag = "1")]
    pub sum: ::core::option::Option<Sum>,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct SumResponse {
    #[prost(int32, tag = "1")]
    pub result: i32,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct SumManyTimesRequest {
    #[prost(int32, tag = "1")]
    pub total: i32,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct SumManyTimesResponse {
    #[prost(int32, tag = "1")]
    pub result: i32,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct AvgLongRequest {
    #[prost(int64, tag = "1")]
    pub num: i64,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct AvgLongResponse {
    #[prost(double, tag = "1")]
    pub result: f64,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct FindMaximumRequest {
    #[prost(int32, tag = "1")]
    pub number: i32,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct FindMaximumResponse {
    #[prost(int32, tag = "1")]
    pub maximum: i32,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct SquareRootRequest {
    #[prost(int32, tag = "1")]
    pub number: i32,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct SquareRootResponse {
    #[prost(double, tag = "1")]
    pub number: f64,
}
