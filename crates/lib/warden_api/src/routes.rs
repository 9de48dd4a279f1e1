//! Route paths.

pub const GET_HEALTH: &str = "/health";

pub const POST_AUTH_REGISTER: &str = "/api/auth/register";
pub const POST_AUTH_LOGIN: &str = "/api/auth/login";
pub const POST_AUTH_LOGOUT: &str = "/api/auth/logout";
pub const POST_AUTH_REFRESH: &str = "/api/auth/refresh";
pub const POST_AUTH_FORGOT_PASSWORD: &str = "/api/auth/forgot-password";
pub const POST_AUTH_RESET_PASSWORD: &str = "/api/auth/reset-password";
pub const POST_AUTH_VERIFY_EMAIL: &str = "/api/auth/verify/email";
pub const POST_AUTH_VERIFY_EMAIL_RESEND: &str = "/api/auth/verify/email/resend";
pub const GET_AUTH_PROVIDER: &str = "/api/auth/{provider}";
pub const GET_AUTH_PROVIDER_CALLBACK: &str = "/api/auth/{provider}/callback";

pub const GET_USER_ME: &str = "/api/user/me";
pub const GET_USER_ID: &str = "/api/user/{id}";
pub const GET_USER_ALL: &str = "/api/user/get-all";
pub const GET_USER_EMAIL: &str = "/api/user/email";
pub const PATCH_USER_UPDATE: &str = "/api/user/update";
pub const DELETE_USER_ID: &str = "/api/user/delete/{id}";
