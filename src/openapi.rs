use crate::account::{AccountCounts, DataExport, ExportUser, ProfileForm, StorageUsage};
use crate::auth::{AuthSession, SignUpOutcome};
use crate::config::SetupGuide;
use crate::error::ApiErrorBody;
use crate::models::{ChannelSummary, Comment, Identity, Profile, TimePeriod, TrendingSort, TrendingStats, Video};
use crate::notify::{Notification, Variant};
use crate::pages::{
    ChannelCard, ChannelTotals, FaqEntry, HelpPage, HelpTopic, HomePage, MyVideosPage, OwnProfilePage, OwnStats,
    PagedVideos, ProfilePage, SearchFilter, SearchPage, SearchSort, SettingsPage, SubscriptionsPage, TrendingPage,
    UploadPage, VideoCard, ViewerRelations, WatchLaterPage, WatchPage,
};
use crate::routes::{CommentRequest, PasswordChange, RelationResponse, SignInRequest};
use crate::session::SignUpForm;
use crate::toggle::RelationKind;
use crate::upload::UploadReport;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::sign_in,
        crate::routes::sign_up,
        crate::routes::sign_out,
        crate::routes::auth_me,
        crate::routes::home_page,
        crate::routes::search_page,
        crate::routes::watch_page,
        crate::routes::upload_page,
        crate::routes::my_videos_page,
        crate::routes::liked_page,
        crate::routes::watch_later_page,
        crate::routes::subscriptions_page,
        crate::routes::trending_page,
        crate::routes::profile_page,
        crate::routes::own_profile_page,
        crate::routes::settings_page,
        crate::routes::help_page,
        crate::routes::like_video,
        crate::routes::unlike_video,
        crate::routes::dislike_video,
        crate::routes::undislike_video,
        crate::routes::save_for_later,
        crate::routes::remove_from_later,
        crate::routes::subscribe_channel,
        crate::routes::unsubscribe_channel,
        crate::routes::toggle_like_rpc,
        crate::routes::list_comments,
        crate::routes::post_comment,
        crate::routes::upload_video,
        crate::routes::delete_video,
        crate::routes::update_profile,
        crate::routes::upload_avatar,
        crate::routes::change_password,
        crate::routes::export_account,
        crate::routes::delete_account,
    ),
    components(schemas(
        Identity, Profile, ChannelSummary, Video, Comment, TrendingStats, TimePeriod, TrendingSort,
        AuthSession, SignUpOutcome, SignUpForm, SignInRequest, SetupGuide, ApiErrorBody,
        VideoCard, ChannelCard, HomePage, SearchPage, SearchFilter, SearchSort, WatchPage, ViewerRelations,
        UploadPage, MyVideosPage, PagedVideos, WatchLaterPage, SubscriptionsPage, TrendingPage,
        ProfilePage, ChannelTotals, OwnProfilePage, OwnStats, SettingsPage, HelpPage, HelpTopic, FaqEntry,
        RelationResponse, RelationKind, Notification, Variant, CommentRequest, UploadReport,
        ProfileForm, PasswordChange, AccountCounts, StorageUsage, ExportUser, DataExport
    )),
    tags(
        (name = "pages", description = "One view model per screen"),
        (name = "relations", description = "Likes, subscriptions and watch later"),
        (name = "account", description = "Profile and account management"),
    )
)]
pub struct ApiDoc;
