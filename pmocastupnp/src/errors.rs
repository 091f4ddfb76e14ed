use thiserror::Error;

#[derive(Error, Debug)]
pub enum UpnpError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error on {0}: {1}")]
    Http(String, String),
    #[error("XML parse error: {0}")]
    Xml(String),
    #[error("Invalid URL '{0}': {1}")]
    Url(String, String),
    #[error("No such device: {0}")]
    DeviceNotFound(String),
    #[error("Device description at {0} is missing {1}")]
    IncompleteDescription(String, String),
    #[error("SOAP build error: {0}")]
    SoapBuild(String),
    #[error("{0} failed with HTTP status {1}")]
    SoapStatus(String, u16),
    #[error("{0} returned UPnP error {1}: {2} (HTTP status {3})")]
    SoapFault(String, String, String, u16),
}

impl UpnpError {
    pub fn xml(err: impl std::fmt::Display) -> Self {
        UpnpError::Xml(err.to_string())
    }

    pub fn http(url: &str, err: impl std::fmt::Display) -> Self {
        UpnpError::Http(url.to_string(), err.to_string())
    }

    pub fn url(url: &str, err: impl std::fmt::Display) -> Self {
        UpnpError::Url(url.to_string(), err.to_string())
    }
}
