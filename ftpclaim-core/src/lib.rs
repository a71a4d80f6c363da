mod ftp;
mod oauth;
mod sheets;

pub use ftp::{
    DEFAULT_FTP_PORT, FtpConnector, FtpEndpoint, FtpError, FtpSession, RemoteConnector,
    RemoteSession,
};
pub use oauth::{
    AuthorizedUserCredentials, Credentials, OAuthClient, OAuthError, OAuthToken, SHEETS_SCOPE,
    ServiceAccountClient, ServiceAccountKey,
};
pub use sheets::{
    AppendValuesResponse, BatchUpdateValuesResponse, SheetsClient, SheetsError,
    UpdateValuesResponse, ValueRange, spreadsheet_id_from_url,
};
