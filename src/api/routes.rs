//! 转发路由表
//!
//! 每条路由对应后端某个服务上的一个方法，请求体原样转发。
//! 在线状态两条路由需要广播聚合，不在此表中。

use crate::service_names::{AUTH, CONVERSATION, FRIEND, GROUP, MSG, THIRD, USER};

/// 一条转发路由
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteSpec {
    /// HTTP 路径
    pub path: &'static str,
    /// 逻辑服务名
    pub service: &'static str,
    /// RPC 方法名
    pub method: &'static str,
    /// 是否需要会话校验
    pub authenticated: bool,
}

impl RouteSpec {
    const fn authed(path: &'static str, service: &'static str, method: &'static str) -> Self {
        Self {
            path,
            service,
            method,
            authenticated: true,
        }
    }

    const fn public(path: &'static str, service: &'static str, method: &'static str) -> Self {
        Self {
            path,
            service,
            method,
            authenticated: false,
        }
    }

    /// gRPC 方法路径，例如 `/flare.user.user/GetDesignateUsers`
    pub fn rpc_path(&self) -> String {
        let pkg = self.service.to_lowercase();
        format!("/flare.{pkg}.{pkg}/{}", self.method)
    }
}

/// 在线状态查询
pub const ONLINE_STATUS_PATH: &str = "/user/get_users_online_status";
/// 在线 Token 明细查询
pub const ONLINE_TOKEN_DETAIL_PATH: &str = "/user/get_users_online_token_detail";
/// 健康检查
pub const HEALTH_PATH: &str = "/healthz";

/// 全部转发路由
pub const FORWARD_ROUTES: &[RouteSpec] = &[
    // user
    RouteSpec::public("/user/user_register", USER, "UserRegister"),
    RouteSpec::authed("/user/update_user_info", USER, "UpdateUserInfo"),
    RouteSpec::authed("/user/set_global_msg_recv_opt", USER, "SetGlobalRecvMessageOpt"),
    RouteSpec::authed("/user/get_users_info", USER, "GetDesignateUsers"),
    RouteSpec::authed("/user/get_all_users_uid", USER, "GetAllUserID"),
    RouteSpec::authed("/user/account_check", USER, "AccountCheck"),
    RouteSpec::authed("/user/get_users", USER, "GetPaginationUsers"),
    RouteSpec::authed("/user/subscribe_users_status", USER, "SubscribeOrCancelUsersStatus"),
    RouteSpec::authed("/user/get_users_status", USER, "GetUserStatus"),
    RouteSpec::authed("/user/get_subscribe_users_status", USER, "GetSubscribeUsersStatus"),
    // friend
    RouteSpec::authed("/friend/delete_friend", FRIEND, "DeleteFriend"),
    RouteSpec::authed("/friend/get_friend_apply_list", FRIEND, "GetPaginationFriendsApplyTo"),
    RouteSpec::authed("/friend/get_designated_friend_apply", FRIEND, "GetDesignatedFriendsApply"),
    RouteSpec::authed("/friend/get_self_friend_apply_list", FRIEND, "GetPaginationFriendsApplyFrom"),
    RouteSpec::authed("/friend/get_friend_list", FRIEND, "GetPaginationFriends"),
    RouteSpec::authed("/friend/get_designated_friends", FRIEND, "GetDesignatedFriends"),
    RouteSpec::authed("/friend/add_friend", FRIEND, "ApplyToAddFriend"),
    RouteSpec::authed("/friend/add_friend_response", FRIEND, "RespondFriendApply"),
    RouteSpec::authed("/friend/set_friend_remark", FRIEND, "SetFriendRemark"),
    RouteSpec::authed("/friend/add_black", FRIEND, "AddBlack"),
    RouteSpec::authed("/friend/get_black_list", FRIEND, "GetPaginationBlacks"),
    RouteSpec::authed("/friend/remove_black", FRIEND, "RemoveBlack"),
    RouteSpec::authed("/friend/import_friend", FRIEND, "ImportFriends"),
    RouteSpec::authed("/friend/is_friend", FRIEND, "IsFriend"),
    RouteSpec::authed("/friend/get_friend_id", FRIEND, "GetFriendIDs"),
    RouteSpec::authed("/friend/get_specified_friends_info", FRIEND, "GetSpecifiedFriendsInfo"),
    // group
    RouteSpec::authed("/group/create_group", GROUP, "CreateGroup"),
    RouteSpec::authed("/group/set_group_info", GROUP, "SetGroupInfo"),
    RouteSpec::authed("/group/join_group", GROUP, "JoinGroup"),
    RouteSpec::authed("/group/quit_group", GROUP, "QuitGroup"),
    RouteSpec::authed("/group/group_application_response", GROUP, "GroupApplicationResponse"),
    RouteSpec::authed("/group/transfer_group", GROUP, "TransferGroupOwner"),
    RouteSpec::authed("/group/get_recv_group_applicationList", GROUP, "GetGroupApplicationList"),
    RouteSpec::authed("/group/get_user_req_group_applicationList", GROUP, "GetUserReqApplicationList"),
    RouteSpec::authed("/group/get_group_users_req_application_list", GROUP, "GetGroupUsersReqApplicationList"),
    RouteSpec::authed("/group/get_groups_info", GROUP, "GetGroupsInfo"),
    RouteSpec::authed("/group/kick_group", GROUP, "KickGroupMember"),
    RouteSpec::authed("/group/get_group_members_info", GROUP, "GetGroupMembersInfo"),
    RouteSpec::authed("/group/get_group_member_list", GROUP, "GetGroupMemberList"),
    RouteSpec::authed("/group/invite_user_to_group", GROUP, "InviteUserToGroup"),
    RouteSpec::authed("/group/get_joined_group_list", GROUP, "GetJoinedGroupList"),
    RouteSpec::authed("/group/dismiss_group", GROUP, "DismissGroup"),
    RouteSpec::authed("/group/mute_group_member", GROUP, "MuteGroupMember"),
    RouteSpec::authed("/group/cancel_mute_group_member", GROUP, "CancelMuteGroupMember"),
    RouteSpec::authed("/group/mute_group", GROUP, "MuteGroup"),
    RouteSpec::authed("/group/cancel_mute_group", GROUP, "CancelMuteGroup"),
    RouteSpec::authed("/group/set_group_member_info", GROUP, "SetGroupMemberInfo"),
    RouteSpec::authed("/group/get_group_abstract_info", GROUP, "GetGroupAbstractInfo"),
    RouteSpec::authed("/group/get_groups", GROUP, "GetGroups"),
    RouteSpec::authed("/group/get_group_member_user_id", GROUP, "GetGroupMemberUserIDs"),
    // super_group
    RouteSpec::authed("/super_group/get_joined_group_list", GROUP, "GetJoinedSuperGroupList"),
    RouteSpec::authed("/super_group/get_groups_info", GROUP, "GetSuperGroupsInfo"),
    // auth
    RouteSpec::public("/auth/user_token", AUTH, "UserToken"),
    RouteSpec::public("/auth/parse_token", AUTH, "ParseToken"),
    RouteSpec::authed("/auth/force_logout", AUTH, "ForceLogout"),
    // third
    RouteSpec::authed("/third/fcm_update_token", THIRD, "FcmUpdateToken"),
    RouteSpec::authed("/third/set_app_badge", THIRD, "SetAppBadge"),
    RouteSpec::authed("/third/logs/upload", THIRD, "UploadLogs"),
    RouteSpec::authed("/third/logs/delete", THIRD, "DeleteLogs"),
    RouteSpec::authed("/third/logs/search", THIRD, "SearchLogs"),
    // object
    RouteSpec::authed("/object/part_limit", THIRD, "PartLimit"),
    RouteSpec::authed("/object/part_size", THIRD, "PartSize"),
    RouteSpec::authed("/object/initiate_multipart_upload", THIRD, "InitiateMultipartUpload"),
    RouteSpec::authed("/object/auth_sign", THIRD, "AuthSign"),
    RouteSpec::authed("/object/complete_multipart_upload", THIRD, "CompleteMultipartUpload"),
    RouteSpec::authed("/object/access_url", THIRD, "AccessURL"),
    // msg
    RouteSpec::authed("/msg/newest_seq", MSG, "GetMaxSeq"),
    RouteSpec::authed("/msg/search_msg", MSG, "SearchMessage"),
    RouteSpec::authed("/msg/send_msg", MSG, "SendMsg"),
    RouteSpec::authed("/msg/send_business_notification", MSG, "SendBusinessNotification"),
    RouteSpec::authed("/msg/pull_msg_by_seq", MSG, "PullMessageBySeqs"),
    RouteSpec::authed("/msg/revoke_msg", MSG, "RevokeMsg"),
    RouteSpec::authed("/msg/mark_msgs_as_read", MSG, "MarkMsgsAsRead"),
    RouteSpec::authed("/msg/mark_conversation_as_read", MSG, "MarkConversationAsRead"),
    RouteSpec::authed("/msg/get_conversations_has_read_and_max_seq", MSG, "GetConversationsHasReadAndMaxSeq"),
    RouteSpec::authed("/msg/set_conversation_has_read_seq", MSG, "SetConversationHasReadSeq"),
    RouteSpec::authed("/msg/clear_conversation_msg", MSG, "ClearConversationsMsg"),
    RouteSpec::authed("/msg/user_clear_all_msg", MSG, "UserClearAllMsg"),
    RouteSpec::authed("/msg/delete_msgs", MSG, "DeleteMsgs"),
    RouteSpec::authed("/msg/delete_msg_phsical_by_seq", MSG, "DeleteMsgPhysicalBySeq"),
    RouteSpec::authed("/msg/delete_msg_physical", MSG, "DeleteMsgPhysical"),
    RouteSpec::authed("/msg/batch_send_msg", MSG, "BatchSendMsg"),
    RouteSpec::authed("/msg/check_msg_is_send_success", MSG, "GetSendMsgStatus"),
    RouteSpec::authed("/msg/get_server_time", MSG, "GetServerTime"),
    // conversation
    RouteSpec::authed("/conversation/get_all_conversations", CONVERSATION, "GetAllConversations"),
    RouteSpec::authed("/conversation/get_conversation", CONVERSATION, "GetConversation"),
    RouteSpec::authed("/conversation/get_conversations", CONVERSATION, "GetConversations"),
    RouteSpec::authed("/conversation/set_conversations", CONVERSATION, "SetConversations"),
    RouteSpec::authed(
        "/conversation/get_conversation_offline_push_user_ids",
        CONVERSATION,
        "GetConversationOfflinePushUserIDs",
    ),
    // statistics
    RouteSpec::authed("/statistics/user/register", USER, "UserRegisterCount"),
    RouteSpec::authed("/statistics/user/active", MSG, "GetActiveUser"),
    RouteSpec::authed("/statistics/group/create", GROUP, "GroupCreateCount"),
    RouteSpec::authed("/statistics/group/active", MSG, "GetActiveGroup"),
];

/// 需要启动 watcher 的逻辑服务（去重，保持首次出现顺序）
pub fn routed_services() -> Vec<&'static str> {
    let mut services: Vec<&'static str> = Vec::new();
    for route in FORWARD_ROUTES {
        if !services.contains(&route.service) {
            services.push(route.service);
        }
    }
    services
}
