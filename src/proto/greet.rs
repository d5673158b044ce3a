#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Greeting {
    #[prost(string, tag = "1")]
    pub first_name: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub last_name: ::prost::alloc::string::String,
}

/// Request shared by every greet operation.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GreetRequest {
    #[prost(message, optional, tag = "1")]
    pub greeting: ::core::option::Option<Greeting>,
}

impl GreetRequest {
    pub fn new(first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        Self {
            greeting: Some(Greeting {
                first_name: first_name.into(),
                last_name: last_name.into(),
            }),
        }
    }

    pub fn first_name(&self) -> &str {
        self.greeting
            .as_ref()
            .map(|greeting| greeting.first_name.as_str())
            .unwrap_or_default()
    }
}

/// Response shared by every greet operation.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GreetResponse {
    #[prost(string, tag = "1")]
    pub result: ::prost::alloc::string::String,
}
